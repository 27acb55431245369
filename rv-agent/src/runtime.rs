use std::sync::Arc;

use revealer::Dumper;
use tracing::info;

use crate::config::{AgentConfig, AgentError};
use crate::logging;
use crate::process::{self, TargetProcess};
use crate::supervisor::ReloadSupervisor;

/// A dumper attached to one target process, plus its reload task.
pub struct Agent {
    target: TargetProcess,
    dumper: Arc<Dumper>,
    supervisor: Option<ReloadSupervisor>,
}

impl Agent {
    /// Attaches when the configured process is a target, `None` otherwise.
    pub fn start(config: &AgentConfig) -> Result<Option<Self>, AgentError> {
        let Some(target) = process::detect(config) else {
            info!(
                pid = config.effective_pid(),
                "{} not a target, tracing disabled",
                logging::category_target()
            );
            return Ok(None);
        };
        Self::attach(config, target).map(Some)
    }

    pub fn attach(config: &AgentConfig, target: TargetProcess) -> Result<Self, AgentError> {
        let dumper = Dumper::start(config.dumper_config(&target.package, target.pid))?;
        let supervisor = match ReloadSupervisor::spawn(Arc::clone(&dumper), config.reload_signal) {
            Ok(supervisor) => supervisor,
            Err(err) => {
                dumper.shutdown();
                return Err(err);
            }
        };
        info!(
            pid = target.pid,
            package = %target.package,
            "{} dumping into {}",
            logging::category_dump(),
            dumper.config().output_dir.display()
        );
        Ok(Self {
            target,
            dumper,
            supervisor: Some(supervisor),
        })
    }

    pub fn target(&self) -> &TargetProcess {
        &self.target
    }

    pub fn dumper(&self) -> &Arc<Dumper> {
        &self.dumper
    }

    pub fn supervisor(&self) -> Option<&ReloadSupervisor> {
        self.supervisor.as_ref()
    }

    /// Stops the reload task, then drains and joins the writer.
    pub fn shutdown(mut self) {
        if let Some(mut supervisor) = self.supervisor.take() {
            supervisor.shutdown();
        }
        self.dumper.shutdown();
    }
}
