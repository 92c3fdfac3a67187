//! Blocking IMAP-over-TLS session for the monitored mailbox.
//!
//! Every method here blocks on socket I/O and must be called through
//! `tokio::task::spawn_blocking`; the watcher never touches the socket
//! from the async scheduler directly. Dropping the session closes the
//! underlying TCP connection, so the mailbox is released on every exit
//! path, including errors.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls_pki_types::ServerName;

use crate::core::error::{AppError, AppResult};

const IMAP_TLS_PORT: u16 = 993;

/// Bound on every non-IDLE socket read.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Result of one bounded IDLE wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server pushed an EXISTS/RECENT update.
    NewMail,
    /// The wait elapsed with no mailbox change.
    Timeout,
}

/// A logged-in IMAP session with a folder selected.
pub struct ImapSession {
    stream: TlsStream,
    tag_seq: u32,
}

impl ImapSession {
    /// Connect, authenticate and select `folder`.
    pub fn connect(host: &str, email: &str, password: &str, folder: &str) -> AppResult<Self> {
        let tcp = TcpStream::connect((host, IMAP_TLS_PORT))
            .map_err(|e| AppError::Mail(format!("connect {}:{}: {}", host, IMAP_TLS_PORT, e)))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| AppError::Mail(format!("bad IMAP host name '{}': {}", host, e)))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| AppError::Mail(format!("TLS setup for {}: {}", host, e)))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            tag_seq: 0,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(AppError::Mail(format!(
                "unexpected IMAP greeting: {}",
                greeting.trim_end()
            )));
        }

        session.command(&format!(
            "LOGIN \"{}\" \"{}\"",
            imap_quote(email),
            imap_quote(password)
        ))?;
        session.command(&format!("SELECT \"{}\"", imap_quote(folder)))?;

        log::debug!("IMAP session established for {} on {}", email, host);
        Ok(session)
    }

    /// Sequence numbers of messages without the `\Seen` flag, in mailbox
    /// order.
    pub fn search_unseen(&mut self) -> AppResult<Vec<u32>> {
        let lines = self.command("SEARCH UNSEEN")?;
        Ok(parse_search_lines(&lines))
    }

    /// Full raw message (headers + body) without setting `\Seen`.
    pub fn fetch(&mut self, seq: u32) -> AppResult<Vec<u8>> {
        let tag = self.next_tag();
        self.write_line(&format!("{} FETCH {} (BODY.PEEK[])", tag, seq))?;

        let mut raw = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&format!("{} ", tag)) {
                if !status.starts_with("OK") {
                    return Err(AppError::Mail(format!(
                        "FETCH {} rejected: {}",
                        seq,
                        line.trim_end()
                    )));
                }
                return Ok(raw);
            }
            if line.starts_with('*') {
                if let Some(len) = parse_literal_len(&line) {
                    let mut body = vec![0u8; len];
                    self.stream
                        .read_exact(&mut body)
                        .map_err(|e| AppError::Mail(format!("FETCH {} literal read: {}", seq, e)))?;
                    raw = body;
                }
            }
        }
    }

    /// Set `\Seen` on a message so the next SEARCH UNSEEN skips it.
    pub fn mark_seen(&mut self, seq: u32) -> AppResult<()> {
        self.command(&format!("STORE {} +FLAGS (\\Seen)", seq))?;
        Ok(())
    }

    /// Enter IDLE and wait up to `wait` for a mailbox change, then leave
    /// IDLE (DONE + drained tagged reply) regardless of the outcome.
    pub fn idle_wait(&mut self, wait: Duration) -> AppResult<IdleOutcome> {
        let tag = self.next_tag();
        self.write_line(&format!("{} IDLE", tag))?;
        loop {
            let line = self.read_line()?;
            if line.starts_with('+') {
                break;
            }
            if line.starts_with(&format!("{} ", tag)) {
                return Err(AppError::Mail(format!(
                    "IDLE rejected: {}",
                    line.trim_end()
                )));
            }
        }

        // Servers interleave keep-alive chatter ("* OK Still here") with
        // real updates, so the deadline bounds the whole wait, not one read.
        let deadline = Instant::now() + wait;
        let mut outcome = IdleOutcome::Timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.stream.sock.set_read_timeout(Some(remaining))?;
            match self.try_read_line() {
                Ok(Some(line)) => {
                    if is_mailbox_change(&line) {
                        outcome = IdleOutcome::NewMail;
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = self.stream.sock.set_read_timeout(Some(READ_TIMEOUT));
                    return Err(e);
                }
            }
        }
        self.stream.sock.set_read_timeout(Some(READ_TIMEOUT))?;

        self.write_line("DONE")?;
        self.read_until_tagged(&tag)?;
        Ok(outcome)
    }

    /// Best-effort LOGOUT. The socket closes when the session drops.
    pub fn logout(mut self) {
        let tag = self.next_tag();
        let _ = self.write_line(&format!("{} LOGOUT", tag));
    }

    fn next_tag(&mut self) -> String {
        self.tag_seq += 1;
        format!("K{:03}", self.tag_seq)
    }

    fn command(&mut self, cmd: &str) -> AppResult<Vec<String>> {
        let tag = self.next_tag();
        self.write_line(&format!("{} {}", tag, cmd))?;
        self.read_until_tagged(&tag)
    }

    fn read_until_tagged(&mut self, tag: &str) -> AppResult<Vec<String>> {
        let prefix = format!("{} ", tag);
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&prefix) {
                if !status.starts_with("OK") {
                    return Err(AppError::Mail(format!(
                        "IMAP command rejected: {}",
                        line.trim_end()
                    )));
                }
                lines.push(line);
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    fn write_line(&mut self, line: &str) -> AppResult<()> {
        self.stream
            .write_all(format!("{}\r\n", line).as_bytes())
            .map_err(|e| AppError::Mail(format!("IMAP write: {}", e)))?;
        self.stream
            .flush()
            .map_err(|e| AppError::Mail(format!("IMAP flush: {}", e)))?;
        Ok(())
    }

    fn read_line(&mut self) -> AppResult<String> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(AppError::Mail("IMAP connection closed".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(AppError::Mail(format!("IMAP read: {}", e))),
            }
        }
    }

    /// Like `read_line`, but a read timeout yields `Ok(None)` instead of
    /// an error. Used only inside IDLE, where silence is the normal case.
    fn try_read_line(&mut self) -> AppResult<Option<String>> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => {
                    return Err(AppError::Mail("IMAP connection closed during IDLE".into()))
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) => return Err(AppError::Mail(format!("IMAP read during IDLE: {}", e))),
            }
        }
    }
}

/// Escape a string for use inside an IMAP quoted string.
fn imap_quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Sequence numbers from `* SEARCH n n n` lines.
fn parse_search_lines(lines: &[String]) -> Vec<u32> {
    let mut seqs = Vec::new();
    for line in lines {
        if let Some(rest) = line.strip_prefix("* SEARCH") {
            seqs.extend(rest.split_whitespace().filter_map(|t| t.parse::<u32>().ok()));
        }
    }
    seqs
}

/// Length of a trailing `{n}` literal marker, if the line carries one.
fn parse_literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end();
    if !line.ends_with('}') {
        return None;
    }
    let open = line.rfind('{')?;
    line[open + 1..line.len() - 1].parse().ok()
}

/// True for untagged `* n EXISTS` / `* n RECENT` pushes.
fn is_mailbox_change(line: &str) -> bool {
    let line = line.trim_end();
    line.starts_with("* ") && (line.ends_with("EXISTS") || line.ends_with("RECENT"))
}
