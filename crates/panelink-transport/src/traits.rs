use std::future::Future;

use tokio::sync::watch;

use crate::error::Result;

/// A duplex byte link to the peripheral.
///
/// Implementations are shared between one reader task and one writer task, so
/// both directions take `&self`. The link carries no message boundaries of its
/// own: `read` may return any number of bytes, including a fraction of a frame.
pub trait Transport: Send + Sync + 'static {
    /// Read whatever bytes are available into `buf`.
    ///
    /// Returns `Ok(0)` once the link is closed for good.
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Write the whole buffer and flush it to the link.
    fn write_all(&self, buf: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to session re-establishment.
    ///
    /// The watched value is a session generation counter that the owner of the
    /// link bumps every time a fresh session comes up (cable re-plugged,
    /// RFCOMM socket reopened, peripheral rebooted).
    fn reconnects(&self) -> watch::Receiver<u64>;
}
