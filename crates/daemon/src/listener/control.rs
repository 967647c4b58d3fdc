//! Minimal control channel.
//!
//! Only what is needed to authenticate is served here: a greeting, `USER`,
//! `PASS`, `NOOP` and `QUIT`. Every other command belongs to the transfer
//! engine proper and is answered with `502` once logged in, `530` before.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::authz::Authorizer;
use crate::session::EngineHooks;

/// Longest accepted command line, terminator included.
const MAX_LINE: u64 = 4096;

/// Username slot shared with the connection tracker.
pub type UserSlot = Arc<Mutex<Option<String>>>;

/// Per-connection login state.
#[derive(Default)]
struct LoginState {
    pending_user: Option<String>,
    username: Option<String>,
}

/// Serves control connections against an authorizer.
pub struct ControlChannel {
    authorizer: Arc<dyn Authorizer>,
    hooks: Arc<dyn EngineHooks>,
}

impl ControlChannel {
    /// Creates a control channel raising events on `hooks`.
    pub fn new(authorizer: Arc<dyn Authorizer>, hooks: Arc<dyn EngineHooks>) -> Self {
        Self { authorizer, hooks }
    }

    /// Runs one control connection to completion.
    ///
    /// Returns when the client quits or disconnects, or when `cancel` fires.
    /// A logged-in user is always reported through `on_logout` on the way out.
    pub async fn serve<S>(&self, stream: S, user: UserSlot, cancel: CancellationToken) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut state = LoginState::default();

        let result = self
            .run(&mut reader, &mut writer, &mut state, &user, &cancel)
            .await;

        if let Some(username) = state.username.take() {
            *user.lock() = None;
            self.hooks.on_logout(&username);
        }
        result
    }

    async fn run<R, W>(
        &self,
        reader: &mut BufReader<R>,
        writer: &mut W,
        state: &mut LoginState,
        user: &UserSlot,
        cancel: &CancellationToken,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        reply(writer, 220, "Warden ready").await?;

        loop {
            let mut line = String::new();
            let mut limited = (&mut *reader).take(MAX_LINE);
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = reply(writer, 421, "Service closing control connection").await;
                    return Ok(());
                }
                read = limited.read_line(&mut line) => read?,
            };

            if read == 0 {
                return Ok(());
            }
            if !line.ends_with('\n') && read as u64 >= MAX_LINE {
                reply(writer, 500, "Command line too long").await?;
                return Ok(());
            }

            let line = line.trim_end_matches(['\r', '\n']);
            let (verb, arg) = match line.split_once(' ') {
                Some((verb, arg)) => (verb, arg.trim()),
                None => (line, ""),
            };

            match verb.to_ascii_uppercase().as_str() {
                "USER" => {
                    if state.username.is_some() {
                        reply(writer, 503, "Already logged in").await?;
                    } else if arg.is_empty() {
                        reply(writer, 501, "Syntax error in parameters").await?;
                    } else {
                        state.pending_user = Some(arg.to_string());
                        reply(writer, 331, &format!("Password required for {}", arg)).await?;
                    }
                }
                "PASS" => {
                    let Some(username) = state.pending_user.take() else {
                        reply(writer, 503, "Login with USER first").await?;
                        continue;
                    };
                    if self.authenticate(&username, arg).await {
                        *user.lock() = Some(username.clone());
                        // An eviction pass between the check and the slot
                        // write would have missed this connection.
                        if self.authorizer.home_dir(&username).is_none() {
                            *user.lock() = None;
                            tracing::info!(username = %username, "User removed during login");
                            reply(writer, 530, "Login incorrect").await?;
                            continue;
                        }
                        self.hooks.on_login(&username);
                        state.username = Some(username);
                        reply(writer, 230, "Login successful").await?;
                    } else {
                        tracing::info!(username = %username, "Authentication failed");
                        reply(writer, 530, "Login incorrect").await?;
                    }
                }
                "NOOP" => reply(writer, 200, "NOOP ok").await?,
                "QUIT" => {
                    reply(writer, 221, "Goodbye").await?;
                    return Ok(());
                }
                "" => reply(writer, 500, "Syntax error, command unrecognized").await?,
                _ if state.username.is_some() => {
                    reply(writer, 502, "Command not implemented").await?
                }
                _ => reply(writer, 530, "Please login with USER and PASS").await?,
            }
        }
    }

    /// Password hashing is CPU bound, so verification runs off the reactor.
    async fn authenticate(&self, username: &str, password: &str) -> bool {
        let authorizer = Arc::clone(&self.authorizer);
        let username = username.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || authorizer.validate_authentication(&username, &password))
            .await
            .unwrap_or(false)
    }
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, code: u16, text: &str) -> io::Result<()> {
    writer
        .write_all(format!("{} {}\r\n", code, text).as_bytes())
        .await?;
    writer.flush().await
}
