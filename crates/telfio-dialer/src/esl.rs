// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event-socket dialect of the switch control channel.
//!
//! Speaks the line protocol of a FreeSWITCH-style event socket: banner,
//! `auth`, then one command per connection. Originations carry an
//! `api_on_answer` that forks the call's audio to the media WebSocket.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use telfio_core::{Result, SwitchControl, TelfioError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Switch control over an event socket.
#[derive(Debug, Clone)]
pub struct EslSwitch {
    host: String,
    port: u16,
    password: String,
    sip_gateway: String,
    tech_prefix: String,
    country_code: String,
    media_ws_base: String,
}

impl EslSwitch {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: &str,
        port: u16,
        password: &str,
        sip_gateway: &str,
        tech_prefix: &str,
        country_code: &str,
        media_ws_base: &str,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            password: password.to_string(),
            sip_gateway: sip_gateway.to_string(),
            tech_prefix: tech_prefix.to_string(),
            country_code: country_code.to_string(),
            media_ws_base: media_ws_base.trim_end_matches('/').to_string(),
        }
    }

    fn originate_command(&self, number: &str, call_id: &str) -> String {
        let fork = format!(
            "uuid_audio_fork {call_id} start {}/ws/{call_id} mono 8000",
            self.media_ws_base
        );
        format!(
            "bgapi originate {{origination_uuid={call_id},ignore_early_media=true,\
             api_on_answer='{fork}'}}sofia/gateway/{}/{}{number} &park",
            self.sip_gateway, self.tech_prefix
        )
    }

    /// Connects, authenticates, runs one command, returns the response text.
    async fn send_command(&self, command: &str) -> Result<String> {
        let stream = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TelfioError::Timeout { duration: CONNECT_TIMEOUT })?
        .map_err(|e| TelfioError::Switch(format!("event socket connect failed: {e}")))?;

        let mut reader = BufReader::new(stream);

        // Banner.
        read_block(&mut reader).await?;

        // Authenticate.
        let auth = format!("auth {}\n\n", self.password);
        reader
            .get_mut()
            .write_all(auth.as_bytes())
            .await
            .map_err(|e| TelfioError::Switch(format!("auth write failed: {e}")))?;
        let auth_reply = read_block(&mut reader).await?;
        if !auth_reply.contains("+OK") {
            return Err(TelfioError::Switch("event socket auth rejected".to_string()));
        }

        // Command.
        debug!(command, "sending switch command");
        reader
            .get_mut()
            .write_all(format!("{command}\n\n").as_bytes())
            .await
            .map_err(|e| TelfioError::Switch(format!("command write failed: {e}")))?;

        let header = tokio::time::timeout(COMMAND_TIMEOUT, read_block(&mut reader))
            .await
            .map_err(|_| TelfioError::Timeout { duration: COMMAND_TIMEOUT })??;

        // Some replies carry a body announced by Content-Length.
        let mut response = header.clone();
        if let Some(length) = content_length(&header)
            && length > 0
        {
            let mut body = vec![0u8; length];
            reader
                .read_exact(&mut body)
                .await
                .map_err(|e| TelfioError::Switch(format!("body read failed: {e}")))?;
            response.push_str(&String::from_utf8_lossy(&body));
        }

        Ok(response)
    }
}

/// Reads header lines until the blank line that ends a block.
async fn read_block(reader: &mut BufReader<TcpStream>) -> Result<String> {
    use tokio::io::AsyncBufReadExt;

    let mut block = String::new();
    loop {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| TelfioError::Switch(format!("event socket read failed: {e}")))?;
        if read == 0 {
            return Err(TelfioError::Switch("event socket closed".to_string()));
        }
        if line.trim_end().is_empty() {
            return Ok(block);
        }
        block.push_str(&line);
    }
}

fn content_length(header: &str) -> Option<usize> {
    header
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length:"))
        .and_then(|v| v.trim().parse().ok())
}

/// Normalizes a dialable number: digits only, 10-13 digits, country code
/// prepended to local numbers.
pub fn normalize_number(number: &str, country_code: &str) -> Result<String> {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 || digits.len() > 13 {
        return Err(TelfioError::Invalid(format!(
            "phone number must have 10-13 digits, got {}",
            digits.len()
        )));
    }
    if digits.len() <= 11 {
        Ok(format!("{country_code}{digits}"))
    } else {
        Ok(digits)
    }
}

#[async_trait]
impl SwitchControl for EslSwitch {
    async fn originate(&self, number: &str, call_id: &str) -> Result<()> {
        let clean = normalize_number(number, &self.country_code)?;
        let command = self.originate_command(&clean, call_id);
        info!(call_id, number = %clean, "originating call");

        let response = self.send_command(&command).await?;
        if response.contains("-ERR") {
            warn!(call_id, response = %response.trim(), "origination rejected");
            return Err(TelfioError::Switch(format!(
                "origination rejected: {}",
                response.trim()
            )));
        }
        Ok(())
    }

    async fn hangup(&self, call_id: &str) -> Result<()> {
        let response = self.send_command(&format!("api uuid_kill {call_id}")).await?;
        if response.contains("-ERR") {
            return Err(TelfioError::Switch(format!(
                "hangup failed: {}",
                response.trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn normalize_adds_country_code_to_local_numbers() {
        assert_eq!(normalize_number("11 99999-0000", "55").unwrap(), "5511999990000");
        assert_eq!(normalize_number("5511999990000", "55").unwrap(), "5511999990000");
    }

    #[test]
    fn normalize_rejects_bad_lengths() {
        assert!(normalize_number("12345", "55").is_err());
        assert!(normalize_number("12345678901234", "55").is_err());
    }

    #[test]
    fn originate_command_wires_audio_fork() {
        let switch = EslSwitch::new(
            "127.0.0.1", 8021, "ClueCon", "telfio-trunk", "1290#", "55",
            "ws://127.0.0.1:8000",
        );
        let cmd = switch.originate_command("5511999990000", "call-abc");
        assert!(cmd.contains("origination_uuid=call-abc"));
        assert!(cmd.contains("uuid_audio_fork call-abc start ws://127.0.0.1:8000/ws/call-abc"));
        assert!(cmd.contains("sofia/gateway/telfio-trunk/1290#5511999990000"));
        assert!(cmd.ends_with("&park"));
    }

    /// Minimal scripted event socket: banner, auth, one command.
    async fn spawn_fake_switch(reply: &'static str) -> (std::net::SocketAddr, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = TokioBufReader::new(stream);

            reader
                .get_mut()
                .write_all(b"Content-Type: auth/request\n\n")
                .await
                .unwrap();

            let auth = read_lines_until_blank(&mut reader).await;
            assert!(auth.starts_with("auth "));
            reader
                .get_mut()
                .write_all(b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n")
                .await
                .unwrap();

            let command = read_lines_until_blank(&mut reader).await;
            tx.send(command).await.unwrap();
            reader
                .get_mut()
                .write_all(reply.as_bytes())
                .await
                .unwrap();
        });

        (addr, rx)
    }

    async fn read_lines_until_blank(
        reader: &mut TokioBufReader<tokio::net::TcpStream>,
    ) -> String {
        let mut block = String::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            if line.trim_end().is_empty() {
                return block;
            }
            block.push_str(&line);
        }
    }

    #[tokio::test]
    async fn originate_sends_command_and_accepts_ok() {
        let (addr, mut commands) =
            spawn_fake_switch("Content-Type: command/reply\nReply-Text: +OK Job-UUID: x\n\n").await;

        let switch = EslSwitch::new(
            &addr.ip().to_string(), addr.port(), "ClueCon", "telfio-trunk", "", "55",
            "ws://127.0.0.1:8000",
        );
        switch.originate("11 98888-0000", "call-9").await.unwrap();

        let sent = commands.recv().await.unwrap();
        assert!(sent.contains("bgapi originate"));
        assert!(sent.contains("5511988880000"));
    }

    #[tokio::test]
    async fn origination_error_propagates() {
        let (addr, _commands) =
            spawn_fake_switch("Content-Type: command/reply\nReply-Text: -ERR GATEWAY_DOWN\n\n")
                .await;

        let switch = EslSwitch::new(
            &addr.ip().to_string(), addr.port(), "ClueCon", "telfio-trunk", "", "55",
            "ws://127.0.0.1:8000",
        );
        let err = switch.originate("11988880000", "call-10").await;
        assert!(matches!(err, Err(TelfioError::Switch(_))));
    }
}
