use std::fmt;
use std::sync::Arc;

use super::cmd::CommandStreamInfo;
use super::{GPUError, QueueType};

/// Receives info, warning and error messages from a context.
pub type LogCallback = Arc<dyn Fn(log::Level, &str) + Send + Sync>;

/// Settings handed to [`Context::new`](super::Context::new) and kept by the
/// context for its lifetime.
#[derive(Clone)]
pub struct ContextInfo {
    pub application_name: String,
    pub frames_in_flight: usize,
    /// Logical queues to create, one entry per queue.
    pub queues: Vec<QueueType>,
    pub validation: bool,
    /// Template used by [`Context::create_default_command_stream`](super::Context::create_default_command_stream)
    /// and internal upload streams.
    pub default_stream: CommandStreamInfo,
    pub log_callback: Option<LogCallback>,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            application_name: "kombu".to_string(),
            frames_in_flight: 2,
            queues: vec![QueueType::Graphics, QueueType::Transfer, QueueType::Compute],
            validation: false,
            default_stream: CommandStreamInfo::default(),
            log_callback: None,
        }
    }
}

impl fmt::Debug for ContextInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextInfo")
            .field("application_name", &self.application_name)
            .field("frames_in_flight", &self.frames_in_flight)
            .field("queues", &self.queues)
            .field("validation", &self.validation)
            .field("default_stream", &self.default_stream)
            .field("log_callback", &self.log_callback.is_some())
            .finish()
    }
}

impl ContextInfo {
    /// Defaults overlaid with `KOMBU_VALIDATION` and `KOMBU_FRAMES_IN_FLIGHT`.
    pub fn from_env() -> Self {
        let mut info = Self::default();
        if let Ok(v) = std::env::var("KOMBU_VALIDATION") {
            info.validation = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(n) = std::env::var("KOMBU_FRAMES_IN_FLIGHT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            info.frames_in_flight = n;
        }
        info
    }

    pub fn with_log_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(log::Level, &str) + Send + Sync + 'static,
    {
        self.log_callback = Some(Arc::new(f));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), GPUError> {
        if self.frames_in_flight == 0 {
            return Err(GPUError::Configuration(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if self.queues.is_empty() {
            return Err(GPUError::Configuration("at least one queue is required".into()));
        }
        if self.queues.len() > u16::MAX as usize {
            return Err(GPUError::Configuration("too many queues".into()));
        }
        Ok(())
    }
}

/// Routes messages to the `log` facade and to the caller's callback.
#[derive(Clone, Default)]
pub(crate) struct Reporter {
    callback: Option<LogCallback>,
}

impl Reporter {
    pub fn new(callback: Option<LogCallback>) -> Self {
        Self { callback }
    }

    pub fn emit(&self, level: log::Level, target: &str, args: fmt::Arguments<'_>) {
        log::log!(target: target, level, "{}", args);
        if level <= log::Level::Info {
            if let Some(cb) = &self.callback {
                cb(level, &args.to_string());
            }
        }
    }

    pub fn info(&self, target: &str, args: fmt::Arguments<'_>) {
        self.emit(log::Level::Info, target, args);
    }

    pub fn warn(&self, target: &str, args: fmt::Arguments<'_>) {
        self.emit(log::Level::Warn, target, args);
    }

    /// Reports `err` and hands it back for propagation.
    pub fn error(&self, target: &str, err: GPUError) -> GPUError {
        self.emit(log::Level::Error, target, format_args!("{}", err));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn callback_sees_info_and_errors_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let info = ContextInfo::default().with_log_callback(move |level, msg| {
            sink.lock().unwrap().push((level, msg.to_string()));
        });

        let reporter = Reporter::new(info.log_callback.clone());
        reporter.info("kombu::test", format_args!("hello {}", 1));
        reporter.emit(log::Level::Debug, "kombu::test", format_args!("hidden"));
        let err = reporter.error("kombu::test", GPUError::DeviceLost);
        assert!(matches!(err, GPUError::DeviceLost));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (log::Level::Info, "hello 1".to_string()));
        assert_eq!(seen[1].0, log::Level::Error);
    }

    #[test]
    fn zero_frames_is_rejected() {
        let info = ContextInfo {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(info.validate(), Err(GPUError::Configuration(_))));
    }
}
