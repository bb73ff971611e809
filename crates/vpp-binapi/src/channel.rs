//! Connection to the dataplane and per-module API channels.
//!
//! A [`Connection`] performs the `sockclnt_create` handshake, keeps the
//! peer's message table and runs one reader task that routes every reply to
//! the request that owns its context. An [`ApiChannel`] is a cheap handle
//! bound to one [`Dialect`]; handlers issue requests and dumps through it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{
    decode_body, decode_reply_header, encode_request, Dump, Message, Reply, Request, RequestHeader,
};
use crate::dialect::Dialect;
use crate::error::{BinapiError, BinapiResult};
use crate::msgs::memclnt::{
    ControlPing, ControlPingReply, SockclntCreate, SockclntCreateReply, SOCKCLNT_CREATE_ID,
    SOCKCLNT_CREATE_REPLY_ID,
};
use crate::transport::Transport;

/// memclnt messages have the same layout in every dialect.
const BOOTSTRAP_DIALECT: Dialect = Dialect::Vpp2001;

struct Shared {
    transport: Arc<dyn Transport>,
    client_index: u32,
    ids: HashMap<String, u16>,
    names: HashMap<u16, String>,
    pending: Mutex<HashMap<u32, mpsc::UnboundedSender<Vec<u8>>>>,
    next_context: AtomicU32,
    closed: AtomicBool,
    timeout: Duration,
}

impl Shared {
    fn msg_id(&self, name: &str, dialect: Dialect) -> BinapiResult<u16> {
        let name_crc = dialect
            .name_crc(name)
            .ok_or_else(|| BinapiError::UnknownMessage(format!("{} ({})", name, dialect)))?;
        self.ids
            .get(&name_crc)
            .copied()
            .ok_or(BinapiError::UnknownMessage(name_crc))
    }

    fn name_of(&self, id: u16) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{}", id))
    }

    /// Registers a waiter for `context`; dropped with the returned guard.
    fn subscribe(&self) -> (PendingGuard<'_>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let context = self.next_context.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().insert(context, tx);
        (
            PendingGuard {
                shared: self,
                context,
            },
            rx,
        )
    }

    async fn send<M: Message>(&self, msg: &M, context: u32, dialect: Dialect) -> BinapiResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BinapiError::Disconnected);
        }
        let header = RequestHeader {
            msg_id: self.msg_id(M::NAME, dialect)?,
            client_index: self.client_index,
            context,
        };
        let frame = encode_request(header, msg, dialect)?;
        self.transport.send(frame).await
    }

    fn timeout_error(&self, message: &'static str) -> BinapiError {
        BinapiError::Timeout {
            message,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

struct PendingGuard<'a> {
    shared: &'a Shared,
    context: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.context);
    }
}

async fn read_loop(shared: Arc<Shared>) {
    loop {
        match shared.transport.recv().await {
            Ok(Some(frame)) => {
                let header = match decode_reply_header(&frame) {
                    Ok((header, _)) => header,
                    Err(err) => {
                        warn!(error = %err, "malformed frame from VPP dropped");
                        continue;
                    }
                };
                let waiter = shared.pending.lock().get(&header.context).cloned();
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => debug!(
                        context = header.context,
                        message = %shared.name_of(header.msg_id),
                        "reply without a waiting request dropped"
                    ),
                }
            }
            Ok(None) => {
                info!("VPP closed the API connection");
                break;
            }
            Err(err) => {
                warn!(error = %err, "reading from VPP failed");
                break;
            }
        }
    }
    shared.closed.store(true, Ordering::Release);
    // Dropping the senders wakes every waiter with `Disconnected`.
    shared.pending.lock().clear();
}

/// An established API connection.
///
/// Dropping the connection stops its reader task; channels created from it
/// fail with `Disconnected` afterwards.
pub struct Connection {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Performs the handshake and starts routing replies.
    pub async fn connect<T: Transport>(
        transport: T,
        client_name: &str,
        timeout: Duration,
    ) -> BinapiResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let header = RequestHeader {
            msg_id: SOCKCLNT_CREATE_ID,
            client_index: 0,
            context: 0,
        };
        let request = SockclntCreate {
            name: client_name.to_string(),
        };
        transport
            .send(encode_request(header, &request, BOOTSTRAP_DIALECT)?)
            .await?;

        let frame = tokio::time::timeout(timeout, transport.recv())
            .await
            .map_err(|_| BinapiError::Timeout {
                message: SockclntCreate::NAME,
                timeout_ms: timeout.as_millis() as u64,
            })??
            .ok_or(BinapiError::Disconnected)?;
        let (reply_header, body) = decode_reply_header(&frame)?;
        if reply_header.msg_id != SOCKCLNT_CREATE_REPLY_ID {
            return Err(BinapiError::UnexpectedReply {
                message: SockclntCreate::NAME,
                got: format!("#{}", reply_header.msg_id),
            });
        }
        let reply: SockclntCreateReply = decode_body(body, BOOTSTRAP_DIALECT)?;
        if reply.retval() != 0 {
            return Err(BinapiError::retval(SockclntCreate::NAME, reply.retval()));
        }

        let mut ids = HashMap::with_capacity(reply.message_table.len());
        let mut names = HashMap::with_capacity(reply.message_table.len());
        for entry in reply.message_table {
            names.insert(entry.index, entry.name.clone());
            ids.insert(entry.name, entry.index);
        }
        info!(
            client = client_name,
            client_index = reply.index,
            messages = ids.len(),
            "connected to VPP"
        );

        let shared = Arc::new(Shared {
            transport,
            client_index: reply.index,
            ids,
            names,
            pending: Mutex::new(HashMap::new()),
            next_context: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            timeout,
        });
        let reader = tokio::spawn(read_loop(shared.clone()));
        Ok(Self { shared, reader })
    }

    /// Whether the peer knows `name_crc`.
    pub fn has_message(&self, name_crc: &str) -> bool {
        self.shared.ids.contains_key(name_crc)
    }

    /// Checks every `{name}_{crc}` against the peer's message table.
    pub fn check_compatibility(&self, messages: &[String]) -> BinapiResult<()> {
        match messages.iter().find(|m| !self.has_message(m)) {
            Some(missing) => Err(BinapiError::UnknownMessage(missing.clone())),
            None => Ok(()),
        }
    }

    /// A channel speaking `dialect`.
    pub fn channel(&self, dialect: Dialect) -> ApiChannel {
        ApiChannel {
            shared: self.shared.clone(),
            dialect,
        }
    }

    /// Round-trips a control ping.
    pub async fn ping(&self) -> BinapiResult<()> {
        self.channel(BOOTSTRAP_DIALECT).request(&ControlPing).await?;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.shared.closed.store(true, Ordering::Release);
        self.shared.pending.lock().clear();
    }
}

/// Request/reply and dump access to the dataplane in one dialect.
#[derive(Clone)]
pub struct ApiChannel {
    shared: Arc<Shared>,
    dialect: Dialect,
}

impl ApiChannel {
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Sends `req` and waits for its reply. A non-zero retval is an error.
    pub async fn request<R: Request>(&self, req: &R) -> BinapiResult<R::Reply> {
        let shared = &*self.shared;
        let (guard, mut rx) = shared.subscribe();
        shared.send(req, guard.context, self.dialect).await?;
        let reply_id = shared.msg_id(<R::Reply as Message>::NAME, self.dialect)?;

        let frame = tokio::time::timeout(shared.timeout, rx.recv())
            .await
            .map_err(|_| shared.timeout_error(R::NAME))?
            .ok_or(BinapiError::Disconnected)?;
        let (header, body) = decode_reply_header(&frame)?;
        if header.msg_id != reply_id {
            return Err(BinapiError::UnexpectedReply {
                message: R::NAME,
                got: shared.name_of(header.msg_id),
            });
        }
        let reply: R::Reply = decode_body(body, self.dialect)?;
        if reply.retval() != 0 {
            return Err(BinapiError::retval(R::NAME, reply.retval()));
        }
        Ok(reply)
    }

    /// Sends `req` followed by a control ping and collects the details that
    /// arrive before the ping reply.
    pub async fn dump<D: Dump>(&self, req: &D) -> BinapiResult<Vec<D::Details>> {
        let shared = &*self.shared;
        let details_id = shared.msg_id(<D::Details as Message>::NAME, self.dialect)?;
        let ping_reply_id = shared.msg_id(ControlPingReply::NAME, self.dialect)?;
        let (guard, mut rx) = shared.subscribe();
        shared.send(req, guard.context, self.dialect).await?;
        shared.send(&ControlPing, guard.context, self.dialect).await?;

        let collect = async {
            let mut details = Vec::new();
            loop {
                let frame = rx.recv().await.ok_or(BinapiError::Disconnected)?;
                let (header, body) = decode_reply_header(&frame)?;
                if header.msg_id == details_id {
                    details.push(decode_body::<D::Details>(body, self.dialect)?);
                } else if header.msg_id == ping_reply_id {
                    return Ok(details);
                } else {
                    return Err(BinapiError::UnexpectedReply {
                        message: D::NAME,
                        got: shared.name_of(header.msg_id),
                    });
                }
            }
        };
        tokio::time::timeout(shared.timeout, collect)
            .await
            .map_err(|_| shared.timeout_error(D::NAME))?
    }
}

impl std::fmt::Debug for ApiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiChannel")
            .field("dialect", &self.dialect)
            .field("client_index", &self.shared.client_index)
            .finish()
    }
}
