//! Connection configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use devtools_link::ConnectionConfig;
//!
//! let config = ConnectionConfig::new()
//!     .with_open_timeout(Duration::from_secs(5))
//!     .with_command_timeout(Duration::from_secs(10))
//!     .with_max_pending_requests(256);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default bound for reaching the open state.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout used by `Connection::call`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on the transport close handshake during `destroy`.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default admission limit on outstanding requests.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

/// Event whose observers are looked up by a key inside its params.
pub const DEFAULT_BINDING_METHOD: &str = "Runtime.bindingCalled";

/// Params key naming the binding of a [`DEFAULT_BINDING_METHOD`] event.
pub const DEFAULT_BINDING_NAME_KEY: &str = "name";

/// Methods that close their own target.
///
/// A "target closed" error in reply to one of these is an empty success.
pub const DEFAULT_CLOSE_METHODS: &[&str] = &["Page.close", "Target.closeTarget", "Browser.close"];

// ============================================================================
// ConnectionConfig
// ============================================================================

/// Tunables for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Maximum time `connect` waits for the open state.
    pub open_timeout: Duration,

    /// Timeout applied by `Connection::call`.
    pub command_timeout: Duration,

    /// Maximum time `destroy` waits for the transport close handshake.
    pub close_timeout: Duration,

    /// Outstanding requests allowed before new ones fail fast.
    ///
    /// Applies separately to blocking and detached requests.
    pub max_pending_requests: usize,

    /// Event method dispatched by binding name instead of by method.
    pub binding_method: String,

    /// Params key holding the binding name.
    pub binding_name_key: String,

    /// Methods whose "target closed" error means the close succeeded.
    pub close_methods: Vec<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            binding_method: DEFAULT_BINDING_METHOD.to_string(),
            binding_name_key: DEFAULT_BINDING_NAME_KEY.to_string(),
            close_methods: DEFAULT_CLOSE_METHODS.iter().map(|m| (*m).to_string()).collect(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionConfig {
    /// Sets the open timeout.
    #[inline]
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the default command timeout.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the close timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Sets the binding event method and the params key naming the binding.
    #[inline]
    #[must_use]
    pub fn with_binding(mut self, method: impl Into<String>, name_key: impl Into<String>) -> Self {
        self.binding_method = method.into();
        self.binding_name_key = name_key.into();
        self
    }

    /// Adds a method that closes its own target.
    #[inline]
    #[must_use]
    pub fn with_close_method(mut self, method: impl Into<String>) -> Self {
        self.close_methods.push(method.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
