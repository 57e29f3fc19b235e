use std::sync::Arc;
use anyhow::bail;
use tokio::{select, time};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument};
use crate::config::SessionConfig;
use crate::error::JpipResult;
use crate::protocol::http_transport::{HttpTransport, HyperFetcher};
use crate::protocol::session::Session;
use crate::protocol::transport::TransportEvent;

/// This is the active part around a [Session]: it feeds transport completions into the session
///  and drives its keep-alive timer on tokio.
pub struct SessionDriver {
    session: Arc<Mutex<Session>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    loop_handle: Option<JoinHandle<()>>,
}

impl SessionDriver {
    /// A session that talks HTTP to the server
    pub fn new_http(config: Arc<SessionConfig>, known_target_id: Option<String>) -> anyhow::Result<SessionDriver> {
        let (send, recv) = mpsc::unbounded_channel();
        let transport = HttpTransport::new(Arc::new(HyperFetcher::new()), send);
        let session = Session::new(config, Arc::new(transport), known_target_id)?;
        Ok(SessionDriver::with_session(session, recv))
    }

    /// `events` must receive the completions of the session's transport
    pub fn with_session(session: Session, events: mpsc::UnboundedReceiver<TransportEvent>) -> SessionDriver {
        SessionDriver {
            session: Arc::new(Mutex::new(session)),
            events: Some(events),
            loop_handle: None,
        }
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        self.session.clone()
    }

    pub async fn open(&mut self, base_url: &str) -> anyhow::Result<()> {
        let events = match self.events.take() {
            Some(events) => events,
            None => bail!("session driver was already opened"),
        };

        self.session.lock().await.open(base_url)?;

        let span = info_span!("jpip_session", base_url = base_url);
        self.loop_handle = Some(tokio::spawn(run_session_loop(self.session.clone(), events).instrument(span)));
        Ok(())
    }

    /// Closes the session and waits for the server's confirmation
    pub async fn close(&self) -> anyhow::Result<()> {
        let (send, recv) = oneshot::channel();
        self.session.lock().await.close(Box::new(move |result: JpipResult<()>| {
            let _ = send.send(result);
        }))?;

        recv.await??;
        Ok(())
    }
}

impl Drop for SessionDriver {
    fn drop(&mut self) {
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
    }
}

async fn run_session_loop(session: Arc<Mutex<Session>>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
    let period = session.lock().await.keep_alive_interval();
    let mut keep_alive_ticks = time::interval_at(time::Instant::now() + period, period);

    loop {
        select! {
            opt_event = events.recv() => {
                match opt_event {
                    Some(event) => session.lock().await.on_transport_event(event),
                    None => {
                        debug!("transport was dropped, stopping session loop");
                        return;
                    }
                }
            }
            _ = keep_alive_ticks.tick() => {
                session.lock().await.on_keep_alive_tick();
            }
        }
    }
}
