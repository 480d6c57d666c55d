//! Command mode and the switch to API mode
//!
//! A module fresh from the factory (or configured by another tool) talks
//! plain text at some baud rate. `+++` after a period of silence puts it in
//! command mode, where `ATAP2`, `ATWR` and `ATCN` switch it to escaped API
//! frames and return it to data mode.

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::api::{lock, XBee};
use super::at_commands::{baud_rate_command, candidate_baud_rates, AtValue};
use super::commands::CommandModeCommand;
use super::{ProtocolError, COMMAND_MODE_GUARD_TIME, COMMAND_MODE_TIMEOUT, PROBE_TIMEOUT};
use crate::config::DeviceConfig;

/// Text reply to a command-mode command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandModeResponse {
    Ok,
    Error,
    /// A queried value
    Text(String),
}

impl CommandModeResponse {
    pub fn parse(data: &str) -> Self {
        if data.contains("OK") {
            CommandModeResponse::Ok
        } else if data.contains("ERROR") {
            CommandModeResponse::Error
        } else {
            CommandModeResponse::Text(data.to_string())
        }
    }

    /// `OK` or a non-empty value
    pub fn is_positive(&self) -> bool {
        match self {
            CommandModeResponse::Ok => true,
            CommandModeResponse::Error => false,
            CommandModeResponse::Text(text) => !text.is_empty(),
        }
    }
}

/// Where the API mode negotiation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
    Idle,
    /// Trying an API frame at the configured rate
    ProbingBinary,
    /// Keeping the line quiet before `+++`
    EnteringCommandMode,
    AwaitingEscapeAck,
    Configuring,
    /// `ATCN` sent
    ExitingCommandMode,
    /// Trying `+++` at each candidate rate
    BaudSweep,
    Done,
    Failed,
}

fn acknowledged(response: &Option<CommandModeResponse>) -> bool {
    response.as_ref().is_some_and(|r| r.is_positive())
}

impl XBee {
    pub fn transition_state(&self) -> TransitionState {
        *lock(&self.shared.transition)
    }

    fn set_transition(&self, state: TransitionState) {
        debug!("API mode transition: {:?}", state);
        *lock(&self.shared.transition) = state;
    }

    pub(crate) fn handle_command_mode_rsp(&self, data: &str) {
        debug!("Handling AT command mode response: {}", data);
        let Some(tx) = lock(&self.shared.command_mode).take() else {
            return;
        };
        let _ = tx.send(CommandModeResponse::parse(data));
    }

    /// Send one command-mode command and wait for its text reply.
    ///
    /// `Ok(None)` if the module stayed silent.
    pub async fn command_mode_at_cmd(
        &self,
        command: CommandModeCommand,
    ) -> Result<Option<CommandModeResponse>, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.shared.command_mode) = Some(tx);
        self.with_gateway(|gateway| gateway.command_mode_send(&command.to_bytes()))?;

        match tokio::time::timeout(COMMAND_MODE_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(Some(response)),
            Ok(Err(_)) | Err(_) => {
                debug!("Command mode no response to AT '{}' command", command.command);
                Ok(None)
            }
        }
    }

    /// Wait out the guard time and send `+++`
    pub async fn enter_command_mode(&self) -> Result<Option<CommandModeResponse>, ProtocolError> {
        self.set_transition(TransitionState::EnteringCommandMode);
        tokio::time::sleep(COMMAND_MODE_GUARD_TIME).await;
        self.set_transition(TransitionState::AwaitingEscapeAck);
        self.command_mode_at_cmd(CommandModeCommand::escape_sequence())
            .await
    }

    /// Switch to escaped API mode at `baud_rate`, persist it and leave command mode.
    ///
    /// Stops at the first command that is not acknowledged.
    pub async fn configure_and_exit(&self, baud_rate: u32) -> Result<bool, ProtocolError> {
        self.set_transition(TransitionState::Configuring);

        let mut commands: Vec<&str> = Vec::with_capacity(4);
        if let Some(bd) = baud_rate_command(baud_rate) {
            commands.push(bd);
        }
        commands.extend(["ATAP2", "ATWR", "ATCN"]);

        for cmd in commands {
            if cmd == "ATCN" {
                self.set_transition(TransitionState::ExitingCommandMode);
            }
            let response = self.command_mode_at_cmd(CommandModeCommand::new(cmd)).await?;
            if !acknowledged(&response) {
                debug!("No response to {} cmd", cmd);
                return Ok(false);
            }
            debug!("Successfully sent {} cmd", cmd);
        }

        self.with_gateway(|gateway| {
            gateway.reset_command_mode();
            Ok(())
        })?;
        Ok(true)
    }

    /// Put the module into API mode at the current host baud rate.
    ///
    /// Tries the current rate first, then every candidate rate in ascending
    /// order. The host side is always left at the rate it started with.
    /// `Ok(false)` if the module never answered.
    pub async fn establish(&self) -> Result<bool, ProtocolError> {
        let target = self.baud_rate()?;

        if acknowledged(&self.enter_command_mode().await?) {
            debug!("Entered AT Command mode at {}bps.", target);
            let configured = self.configure_and_exit(target).await?;
            self.finish_transition(configured);
            return Ok(configured);
        }

        self.set_transition(TransitionState::BaudSweep);
        for rate in candidate_baud_rates() {
            debug!(
                "Failed to enter AT command mode at {}bps, trying {} next",
                self.baud_rate()?,
                rate
            );
            self.set_baud_rate(rate)?;
            if acknowledged(&self.enter_command_mode().await?) {
                debug!("Entered AT Command mode at {}bps.", rate);
                let configured = self.configure_and_exit(target).await;
                let restored = self.set_baud_rate(target);
                let configured = configured?;
                restored?;
                self.finish_transition(configured);
                return Ok(configured);
            }
        }

        warn!(
            "Couldn't enter AT command mode at any known baudrate. \
             Configure XBee manually for escaped API mode ATAP2"
        );
        self.set_baud_rate(target)?;
        self.finish_transition(false);
        Ok(false)
    }

    fn finish_transition(&self, configured: bool) {
        self.set_transition(if configured {
            TransitionState::Done
        } else {
            TransitionState::Failed
        });
    }

    /// Make sure the module speaks escaped API frames, switching it over
    /// through command mode if it does not answer
    pub async fn ensure_api_mode(&self) -> Result<(), ProtocolError> {
        self.set_transition(TransitionState::ProbingBinary);
        match self.at_command("AP", Some(AtValue::U8(2))).await {
            Ok(_) => {
                self.set_transition(TransitionState::Done);
                Ok(())
            }
            Err(ProtocolError::Timeout(_)) => {
                if self.establish().await? {
                    Ok(())
                } else {
                    Err(ProtocolError::ApiModeUnavailable)
                }
            }
            Err(e) => {
                self.set_transition(TransitionState::Failed);
                Err(e)
            }
        }
    }

    /// Check whether an XBee is attached at `config.path`
    pub async fn probe(config: DeviceConfig) -> bool {
        XBee::new(config).probe_device().await
    }

    /// Connect, make sure API mode works, and close again
    pub async fn probe_device(&self) -> bool {
        let result = tokio::time::timeout(PROBE_TIMEOUT, async {
            self.connect().await?;
            self.ensure_api_mode().await?;
            Ok::<(), ProtocolError>(())
        })
        .await;
        self.close();

        match result {
            Ok(Ok(())) => {
                info!("Found XBee on '{}'", self.config().path);
                true
            }
            Ok(Err(e)) => {
                debug!("Unsuccessful radio probe of '{}' port: {}", self.config().path, e);
                false
            }
            Err(_) => {
                debug!("Radio probe of '{}' port timed out", self.config().path);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        assert_eq!(CommandModeResponse::parse("OK"), CommandModeResponse::Ok);
        assert_eq!(CommandModeResponse::parse("ERROR"), CommandModeResponse::Error);
        assert_eq!(
            CommandModeResponse::parse("3"),
            CommandModeResponse::Text("3".to_string())
        );
    }

    #[test]
    fn test_positive_responses() {
        assert!(CommandModeResponse::Ok.is_positive());
        assert!(!CommandModeResponse::Error.is_positive());
        assert!(CommandModeResponse::Text("1".to_string()).is_positive());
        assert!(!CommandModeResponse::Text(String::new()).is_positive());
        assert!(!acknowledged(&None));
    }

    #[test]
    fn test_reply_without_request_is_ignored() {
        let xbee = XBee::new(DeviceConfig::new("/dev/null"));
        xbee.handle_command_mode_rsp("OK");
        assert_eq!(xbee.transition_state(), TransitionState::Idle);
    }
}
