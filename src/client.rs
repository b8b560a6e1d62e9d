//! The named-mutex client.

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, TcpTransport, Transport};
use crate::error::{MutexError, Result};
use crate::protocol::{Request, WireCodec, codec_for};
use crate::retry::{CancelToken, RetryingOperation};

/// Operations offered by a named-mutex service.
///
/// Every call blocks until the server acknowledges it or the retry policy
/// gives up.
pub trait MutexService {
    /// Take `key`, tagged with `source` when given.
    fn lock(&self, key: &str, source: Option<&str>) -> Result<()>;

    /// Release `key`. Releasing a free key still succeeds.
    fn unlock(&self, key: &str) -> Result<()>;

    /// Block until `key` is free, without keeping it.
    fn wait(&self, key: &str) -> Result<()> {
        self.lock(key, None)?;
        self.unlock(key)
    }

    /// Forcibly clear `key`, whoever holds it.
    fn reset_by_key(&self, key: &str) -> Result<()>;

    /// Forcibly clear every lock tagged with `source`. `None` selects the
    /// empty tag.
    fn reset_by_source(&self, source: Option<&str>) -> Result<()>;
}

/// Client of a remote lock server.
///
/// The client holds no mutable state besides its cancellation token, so a
/// shared reference can be used from many threads at once.
///
/// ```rust,no_run
/// use lockcenter::{MutexClient, MutexService};
///
/// let client = MutexClient::connect("127.0.0.1:4000")?;
/// client.lock("session1", Some("10.0.0.5"))?;
/// client.unlock("session1")?;
/// # Ok::<(), lockcenter::MutexError>(())
/// ```
pub struct MutexClient<T: Transport = TcpTransport> {
    manager: ConnectionManager<T>,
    codec: &'static dyn WireCodec,
    config: ClientConfig,
    cancel: CancelToken,
}

impl MutexClient<TcpTransport> {
    /// Connect to `addr` with the default configuration.
    pub fn connect(addr: &str) -> Result<Self> {
        Self::new(ClientConfig::new(addr))
    }

    /// Connect over TCP as described by `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = TcpTransport::new(config.connect_timeout(), config.io_timeout());
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> MutexClient<T> {
    /// Build a client over any transport.
    ///
    /// The address is validated and probed once; a malformed address or an
    /// unreachable server fails here, without retrying.
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self> {
        let endpoint = config.endpoint()?;
        config.retry.validate()?;
        let manager = ConnectionManager::new(endpoint, transport);
        manager
            .try_probe()
            .map_err(|source| MutexError::Unreachable {
                endpoint: manager.endpoint().to_string(),
                source,
            })?;
        log::info!(
            "lock server {} reachable, protocol {}",
            manager.endpoint(),
            config.protocol
        );
        Ok(Self {
            manager,
            codec: codec_for(config.protocol),
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Observe `token` instead of the client's own token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels every operation of this client.
    ///
    /// A cancelled token stays cancelled until [`CancelToken::reset`].
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Configuration the client was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one request to completion and return the number of attempts.
    pub fn execute(&self, request: &Request) -> Result<u32> {
        self.execute_with(request, &self.cancel)
    }

    /// Like [`MutexClient::execute`], observing `cancel` instead of the
    /// client's token.
    pub fn execute_with(&self, request: &Request, cancel: &CancelToken) -> Result<u32> {
        RetryingOperation::new(&self.config.retry, self.codec, self.config.connection_mode)
            .execute(&self.manager, request, cancel)
    }

    /// [`MutexService::lock`] cancelled by `cancel`.
    pub fn lock_with(&self, key: &str, source: Option<&str>, cancel: &CancelToken) -> Result<()> {
        self.execute_with(&Request::lock(key, source), cancel).map(drop)
    }

    /// [`MutexService::unlock`] cancelled by `cancel`.
    pub fn unlock_with(&self, key: &str, cancel: &CancelToken) -> Result<()> {
        self.execute_with(&Request::unlock(key), cancel).map(drop)
    }

    /// [`MutexService::wait`] cancelled by `cancel`.
    ///
    /// Only the lock half observes `cancel`. Once the key is taken it is
    /// released under the retry policy alone, so a cancellation that lands
    /// after the lock never leaves the key held.
    pub fn wait_with(&self, key: &str, cancel: &CancelToken) -> Result<()> {
        self.lock_with(key, None, cancel)?;
        self.unlock_with(key, &CancelToken::new())
    }
}

impl<T: Transport> MutexService for MutexClient<T> {
    fn lock(&self, key: &str, source: Option<&str>) -> Result<()> {
        self.execute(&Request::lock(key, source)).map(drop)
    }

    fn unlock(&self, key: &str) -> Result<()> {
        self.execute(&Request::unlock(key)).map(drop)
    }

    fn wait(&self, key: &str) -> Result<()> {
        self.wait_with(key, &self.cancel)
    }

    fn reset_by_key(&self, key: &str) -> Result<()> {
        self.execute(&Request::reset_by_key(key)).map(drop)
    }

    fn reset_by_source(&self, source: Option<&str>) -> Result<()> {
        self.execute(&Request::reset_by_source(source)).map(drop)
    }
}
