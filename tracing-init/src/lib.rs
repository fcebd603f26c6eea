use tracing_subscriber::{filter::EnvFilter, fmt::time};

/// A Parameter to configure tracing subscriber.
#[derive(Debug, Clone)]
pub struct Parameter<'a> {
    /// Env key holding filter directives. Default `RUST_LOG`.
    directive_env_key: &'a str,
    /// Directive applied when the env key is unset or invalid.
    default_directive: &'a str,
    display_source: bool,
    display_target: bool,
    color: bool,
}

impl Default for Parameter<'_> {
    fn default() -> Self {
        Self {
            directive_env_key: "RUST_LOG",
            default_directive: "info",
            display_source: true,
            display_target: false,
            color: true,
        }
    }
}

impl<'a> Parameter<'a> {
    pub fn with_directive_env_key(mut self, key: &'a str) -> Self {
        self.directive_env_key = key;
        self
    }

    pub fn with_default_directive(mut self, directive: &'a str) -> Self {
        self.default_directive = directive;
        self
    }

    pub fn with_source(mut self, display_source: bool) -> Self {
        self.display_source = display_source;
        self
    }

    pub fn with_target(mut self, display_target: bool) -> Self {
        self.display_target = display_target;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(self.directive_env_key)
            .unwrap_or_else(|_| EnvFilter::new(self.default_directive))
    }
}

/// Error returned when a global subscriber is already installed.
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Initialize global tracing subscriber with default parameter.
///
/// Panics if a global subscriber is already set.
pub fn init() {
    init_with(Parameter::default())
}

/// Initialize global tracing subscriber.
///
/// Panics if a global subscriber is already set.
pub fn init_with(param: Parameter) {
    if let Err(err) = try_init_with(param) {
        panic!("failed to initialize tracing subscriber: {err}");
    }
}

/// Initialize global tracing subscriber, reporting failure instead of panicking.
pub fn try_init_with(param: Parameter) -> Result<(), InitError> {
    let filter = param.env_filter();
    let Parameter {
        display_source,
        display_target,
        color,
        ..
    } = param;

    tracing_subscriber::fmt()
        .with_timer(time::UtcTime::rfc_3339())
        .with_ansi(color)
        .with_file(display_source)
        .with_line_number(display_source)
        .with_target(display_target)
        .with_env_filter(filter)
        .try_init()
}

/// Install a subscriber writing through the test harness capture.
///
/// Safe to call from every test; only the first call installs.
pub fn init_for_tests() {
    let param = Parameter::default()
        .with_default_directive("debug")
        .with_color(false);
    let filter = param.env_filter();

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_ansi(false)
        .with_target(true)
        .with_env_filter(filter)
        .try_init();
}
