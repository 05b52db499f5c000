//! Connection scoping

use querylane_db::Connector;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::operation::Operation;

/// Opens a connection for one operation and always releases it
///
/// The connection is closed after the operation returns, whether it
/// succeeded or failed. If the operation panics the session is dropped
/// during unwinding, which closes the underlying handle as well.
pub struct ConnectionScope<C> {
    connector: Arc<C>,
}

impl<C> Clone for ConnectionScope<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
        }
    }
}

impl<C: Connector> ConnectionScope<C> {
    pub fn new(connector: Arc<C>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    /// Open a connection, run the operation on it, close it
    ///
    /// An open failure is returned as [`CoreError::Connection`] and the
    /// operation is not invoked.
    pub async fn run<O>(&self, op: &O) -> Result<O::Output, CoreError>
    where
        O: Operation + ?Sized,
    {
        let mut conn = self
            .connector
            .open()
            .await
            .map_err(CoreError::Connection)?;
        metrics::counter!("querylane_connections_opened_total").increment(1);

        let result = op.call(&mut conn).await;

        let closed = self.connector.close(conn).await;
        metrics::counter!("querylane_connections_closed_total").increment(1);

        match (result, closed) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(_), Err(e)) => Err(CoreError::Connection(e)),
            (Err(e), Ok(())) => Err(CoreError::Operation(e)),
            (Err(e), Err(close_err)) => {
                // The operation's failure is the one the caller needs to see
                warn!(
                    "Failed to close connection to {} after error: {}",
                    self.connector.target(),
                    close_err
                );
                Err(CoreError::Operation(e))
            }
        }
    }

    /// Run the operation on a connection the caller already holds
    ///
    /// The connection is neither opened nor closed here; the caller keeps
    /// ownership.
    pub async fn run_on<O>(&self, conn: &mut C::Conn, op: &O) -> Result<O::Output, CoreError>
    where
        O: Operation + ?Sized,
    {
        debug!("Running operation on caller-supplied connection");
        op.call(conn).await.map_err(CoreError::Operation)
    }
}
