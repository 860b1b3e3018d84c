//! Lifecycle of one browser socket: Connecting -> Bound -> Closed.

use chassis_lib::DeviceId;
use std::future::Future;
use tokio::sync::mpsc;

use crate::error::{ConnectError, SessionError};
use crate::multiplexer::{ConnectionId, MultiplexerHandle, StatusFrame};
use crate::session::{SessionHandle, SessionRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Bound(DeviceId),
    Closed,
}

/// A browser connection as seen by the bridge.
///
/// Closing, explicitly or by drop, releases the binding. Closed is terminal.
pub struct ClientConnection {
    id: ConnectionId,
    state: ConnectionState,
    multiplexer: MultiplexerHandle,
}

impl ClientConnection {
    pub fn new(multiplexer: MultiplexerHandle) -> Self {
        Self {
            id: multiplexer.next_connection_id(),
            state: ConnectionState::Connecting,
            multiplexer,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Resolve the session and bind to its device.
    ///
    /// On any failure the connection moves straight to Closed; callers must
    /// then drop the transport without telling the peer why.
    pub async fn bind(
        &mut self,
        sessions: &SessionRegistry,
        session: Option<&SessionHandle>,
        buffer: usize,
    ) -> Result<mpsc::Receiver<StatusFrame>, ConnectError> {
        self.bind_until(sessions, session, buffer, std::future::pending())
            .await
    }

    /// Like [`Self::bind`], but gives up with [`ConnectError::Cancelled`] as
    /// soon as `cancelled` resolves. A binding the multiplexer completes
    /// afterwards is rolled back by it.
    pub async fn bind_until<C>(
        &mut self,
        sessions: &SessionRegistry,
        session: Option<&SessionHandle>,
        buffer: usize,
        cancelled: C,
    ) -> Result<mpsc::Receiver<StatusFrame>, ConnectError>
    where
        C: Future<Output = ()>,
    {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectError::NotConnecting);
        }

        let resolved = session
            .ok_or(SessionError::NotAuthenticated)
            .and_then(|handle| sessions.resolve(handle));
        let device = match resolved {
            Ok(device) => device,
            Err(e) => {
                self.state = ConnectionState::Closed;
                return Err(e.into());
            }
        };

        let (sink, frames) = mpsc::channel(buffer.max(1));
        let result = tokio::select! {
            result = self.multiplexer.bind(self.id, device.clone(), sink) => {
                result.map_err(ConnectError::from)
            }
            () = cancelled => Err(ConnectError::Cancelled),
        };

        match result {
            Ok(()) => {
                self.state = ConnectionState::Bound(device);
                Ok(frames)
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    /// Release the binding. Safe to call any number of times.
    pub fn close(&mut self) {
        if let ConnectionState::Bound(_) = self.state {
            self.multiplexer.unbind(self.id);
        }
        self.state = ConnectionState::Closed;
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InboundMessage;
    use crate::testing::{eventually, RecordingLink};
    use chassis_lib::AuthConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<RecordingLink>, MultiplexerHandle, SessionRegistry, mpsc::Sender<InboundMessage>) {
        let link = Arc::new(RecordingLink::new());
        let (inbound, inbound_rx) = mpsc::channel(4);
        let (handle, _task) = MultiplexerHandle::spawn(link.clone(), "CarStatus_", inbound_rx);
        let sessions = SessionRegistry::new(&AuthConfig::default(), Duration::from_secs(60));
        (link, handle, sessions, inbound)
    }

    #[tokio::test]
    async fn test_bind_then_close() {
        let (link, handle, sessions, _inbound) = setup();
        let session = sessions.authenticate("001", "88888888").await.unwrap();

        let mut connection = ClientConnection::new(handle.clone());
        assert_eq!(connection.state(), &ConnectionState::Connecting);

        let _frames = connection
            .bind(&sessions, Some(&session.handle), 4)
            .await
            .unwrap();
        assert_eq!(
            connection.state(),
            &ConnectionState::Bound(DeviceId::parse("001", 3).unwrap())
        );
        assert_eq!(link.subscribes(), vec!["CarStatus_001".to_string()]);

        connection.close();
        connection.close();
        assert_eq!(connection.state(), &ConnectionState::Closed);
        assert_eq!(handle.stats().await.unwrap().connections, 0);
        assert!(eventually(|| link.unsubscribes() == vec!["CarStatus_001".to_string()]).await);
    }

    #[tokio::test]
    async fn test_missing_or_unknown_session_is_rejected() {
        let (link, handle, sessions, _inbound) = setup();

        let mut anonymous = ClientConnection::new(handle.clone());
        let err = anonymous.bind(&sessions, None, 4).await.unwrap_err();
        assert_eq!(err, ConnectError::Session(SessionError::NotAuthenticated));
        assert_eq!(anonymous.state(), &ConnectionState::Closed);

        let mut forged = ClientConnection::new(handle.clone());
        let bogus = SessionHandle::from("forged");
        assert!(forged.bind(&sessions, Some(&bogus), 4).await.is_err());

        assert!(link.calls().is_empty());
        assert_eq!(handle.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_closed_is_terminal() {
        let (_link, handle, sessions, _inbound) = setup();
        let session = sessions.authenticate("001", "88888888").await.unwrap();

        let mut connection = ClientConnection::new(handle);
        connection.close();
        let err = connection
            .bind(&sessions, Some(&session.handle), 4)
            .await
            .unwrap_err();
        assert_eq!(err, ConnectError::NotConnecting);
    }

    #[tokio::test]
    async fn test_drop_releases_binding() {
        let (link, handle, sessions, _inbound) = setup();
        let session = sessions.authenticate("002", "88888888").await.unwrap();
        {
            let mut connection = ClientConnection::new(handle.clone());
            let _frames = connection
                .bind(&sessions, Some(&session.handle), 4)
                .await
                .unwrap();
        }
        assert_eq!(handle.stats().await.unwrap().connections, 0);
        assert!(eventually(|| link.unsubscribes() == vec!["CarStatus_002".to_string()]).await);
    }

    #[tokio::test]
    async fn test_disconnect_during_bind_releases_interest() {
        let (link, handle, sessions, _inbound) = setup();
        let session = sessions.authenticate("005", "88888888").await.unwrap();
        link.hold_subscribes();

        let (gone, gone_rx) = tokio::sync::oneshot::channel::<()>();
        let mut connection = ClientConnection::new(handle.clone());
        let binding = async {
            connection
                .bind_until(&sessions, Some(&session.handle), 4, async {
                    let _ = gone_rx.await;
                })
                .await
        };
        let (result, ()) = tokio::join!(binding, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = gone.send(());
        });

        assert_eq!(result.unwrap_err(), ConnectError::Cancelled);
        assert_eq!(connection.state(), &ConnectionState::Closed);

        link.release_subscribes();
        assert!(eventually(|| link.unsubscribes() == vec!["CarStatus_005".to_string()]).await);
        assert_eq!(handle.stats().await.unwrap(), Default::default());
    }
}
