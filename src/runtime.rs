// 50 Hz loop with per-module watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. if the drivetrain stops sending commands, the module is commanded to zero speed
// instead of holding its last velocity forever

use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::{
    CMD_TIMEOUT, LOOP_HZ, RuntimeConfig, TOPIC_HEALTH, topic_cmd, topic_telemetry, topic_tune,
    topic_tune_ack,
};
use crate::messages::{GainUpdate, ModuleCommand, RuntimeHealth, TuneAck};
use crate::swerve::bus::ActuatorBus;
use crate::swerve::sim::{SimAngleSensor, SimDrive, SimHardware, SimSteering};
use crate::swerve::{
    AngleSensor, BusAngleSensor, BusMotor, DriveActuator, HardwareError, ModuleError, ModuleState,
    SteeringActuator, SwerveModule, TelemetryFrame, configure_all,
};

pub type BusModule = SwerveModule<BusMotor, BusMotor, BusAngleSensor>;
pub type SimModule = SwerveModule<SimDrive, SimSteering, SimAngleSensor>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One module plus the command bookkeeping the watchdog needs
pub struct ModuleHost<D, S, A> {
    module: SwerveModule<D, S, A>,
    latest_cmd: Option<ModuleCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl<D, S, A> ModuleHost<D, S, A>
where
    D: DriveActuator,
    S: SteeringActuator,
    A: AngleSensor,
{
    pub fn new(module: SwerveModule<D, S, A>) -> Self {
        Self {
            module,
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn module(&self) -> &SwerveModule<D, S, A> {
        &self.module
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    fn on_command(&mut self, cmd: ModuleCommand) {
        debug!("Module {} received command: {:?}", self.module.id(), &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Target for this tick, `None` until the first command arrives
    fn compute_target(&mut self) -> Option<ModuleState> {
        let cmd = self.latest_cmd?;
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the wheel, keep it pointed where it was
            if self.health != RuntimeHealth::CmdStale {
                warn!(
                    "Module {}: command stale ({:?} old), stopping",
                    self.module.id(),
                    cmd_age
                );
            }
            self.health = RuntimeHealth::CmdStale;
            Some(self.stop_state())
        } else {
            self.health = RuntimeHealth::Ok;
            Some(ModuleState::from(&cmd))
        }
    }

    fn stop_state(&self) -> ModuleState {
        let angle = self
            .module
            .desired_state()
            .map(|state| state.angle)
            .unwrap_or_default();
        ModuleState::new(0.0, angle)
    }

    /// Push this tick's target to the module
    ///
    /// Only hardware faults are returned; bad commands are logged and dropped.
    fn actuate(&mut self) -> Result<(), ModuleError> {
        let Some(target) = self.compute_target() else {
            return Ok(());
        };
        match self.module.set_desired_state(target) {
            Err(e @ ModuleError::Hardware { .. }) => Err(e),
            Err(e) => {
                warn!("Dropping command: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn on_tune(&mut self, update: GainUpdate) -> TuneAck {
        match self.module.tune(update.channel, update.gains()) {
            Ok(()) => TuneAck {
                channel: update.channel,
                accepted: true,
                reason: None,
            },
            Err(e) => TuneAck {
                channel: update.channel,
                accepted: false,
                reason: Some(e.to_string()),
            },
        }
    }

    /// Command zero speed at the current target angle
    fn stop(&mut self) -> Result<(), ModuleError> {
        if !self.module.is_ready() {
            return Ok(());
        }
        let state = self.stop_state();
        self.module.set_desired_state(state)
    }
}

fn build_bus_modules(config: &RuntimeConfig) -> Result<Vec<BusModule>, HardwareError> {
    info!("Opening actuator bus on {}", config.port);
    let bus = ActuatorBus::open(&config.port)?.into_shared();

    config
        .modules
        .iter()
        .map(|module| {
            let mut drive = BusMotor::new(bus.clone(), module.drive_id);
            let mut steering = BusMotor::new(bus.clone(), module.turn_id);
            drive.probe()?;
            steering.probe()?;
            debug!("Module {}: motors responding", module.id);

            let sensor = BusAngleSensor::new(bus.clone(), module.abs_encoder_id, module.turn_id);
            Ok(SwerveModule::new(
                module.clone(),
                config.settings.clone(),
                drive,
                steering,
                sensor,
            ))
        })
        .collect()
}

/// Simulated modules plus the probes used to step them
pub fn build_sim_modules(config: &RuntimeConfig) -> (Vec<SimModule>, Vec<SimHardware>) {
    config
        .modules
        .iter()
        .map(|module| {
            let sim = SimHardware::for_module(module);
            let swerve = SwerveModule::new(
                module.clone(),
                config.settings.clone(),
                sim.drive(),
                sim.steering(),
                sim.sensor(),
            );
            (swerve, sim)
        })
        .unzip()
}

pub async fn run(config: RuntimeConfig) -> Result<(), BoxError> {
    if config.hardware {
        let modules = build_bus_modules(&config)?;
        serve(modules, Vec::new()).await
    } else {
        info!("Hardware disabled, running simulated modules");
        let (modules, sims) = build_sim_modules(&config);
        serve(modules, sims).await
    }
}

async fn serve<D, S, A>(
    mut modules: Vec<SwerveModule<D, S, A>>,
    sims: Vec<SimHardware>,
) -> Result<(), BoxError>
where
    D: DriveActuator + Send + 'static,
    S: SteeringActuator + Send + 'static,
    A: AngleSensor + Send + 'static,
{
    // Settle windows block, keep them off the async workers
    info!("Configuring {} modules...", modules.len());
    let modules = tokio::task::spawn_blocking(move || {
        configure_all(&mut modules)?;
        Ok::<_, ModuleError>(modules)
    })
    .await??;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let mut cmd_subs = Vec::with_capacity(modules.len());
    let mut tune_subs = Vec::with_capacity(modules.len());
    let mut ack_pubs = Vec::with_capacity(modules.len());
    let mut telemetry_pubs = Vec::with_capacity(modules.len());
    for module in &modules {
        let id = module.id();
        cmd_subs.push(session.declare_subscriber(topic_cmd(id)).await?);
        tune_subs.push(session.declare_subscriber(topic_tune(id)).await?);
        ack_pubs.push(session.declare_publisher(topic_tune_ack(id)).await?);
        telemetry_pubs.push(session.declare_publisher(topic_telemetry(id)).await?);
        info!(
            "Module {}: commands on {}, tuning on {}",
            id,
            topic_cmd(id),
            topic_tune(id)
        );
    }
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut hosts: Vec<ModuleHost<D, S, A>> = modules.into_iter().map(ModuleHost::new).collect();
    let period = Duration::from_millis(1000 / LOOP_HZ);
    let mut tick = interval(period);
    let mut frame = TelemetryFrame::new();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down, stopping all modules");
                for host in &mut hosts {
                    if let Err(e) = host.stop() {
                        error!("Failed to stop module {}: {}", host.module.id(), e);
                    }
                }
                return Ok(());
            }
        }

        for sim in &sims {
            sim.step(period);
        }

        for (i, host) in hosts.iter_mut().enumerate() {
            // 1. Drain all pending commands (non-blocking), keep latest
            while let Ok(Some(sample)) = cmd_subs[i].try_recv() {
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<ModuleCommand>(&payload) {
                    Ok(cmd) => host.on_command(cmd),
                    Err(e) => warn!("Failed to parse command for {}: {}", host.module.id(), e),
                }
            }

            // 2. Apply gain updates, acknowledge each
            while let Ok(Some(sample)) = tune_subs[i].try_recv() {
                let payload = sample.payload().to_bytes();
                match serde_json::from_slice::<GainUpdate>(&payload) {
                    Ok(update) => {
                        let ack = host.on_tune(update);
                        let ack_json = serde_json::to_string(&ack)?;
                        if let Err(e) = ack_pubs[i].put(ack_json).await {
                            warn!("Failed to publish tune ack: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to parse gain update for {}: {}", host.module.id(), e),
                }
            }

            // 3. Actuate (includes watchdog logic); a bus fault is fatal
            host.actuate()?;

            // 4. Telemetry, best effort
            frame.clear();
            host.module.periodic(&mut frame);
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if let Err(e) = telemetry_pubs[i].put(json).await {
                        warn!("Failed to publish telemetry: {}", e);
                    }
                }
                Err(e) => warn!("Failed to encode telemetry: {}", e),
            }
        }

        // 5. Publish health
        let health = if hosts.iter().all(|h| h.health() == RuntimeHealth::Ok) {
            RuntimeHealth::Ok
        } else {
            RuntimeHealth::CmdStale
        };
        let health_json = serde_json::to_string(&health)?;
        if let Err(e) = pub_health.put(health_json).await {
            warn!("Failed to publish health: {}", e);
        }
    }
}
