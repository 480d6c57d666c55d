mod common;

use common::{config, frame, unframe, MockLink, Responder};
use pretty_assertions::assert_eq;
use xbeelink_core::protocol::{
    CommandModeCommand, CommandModeResponse, ProtocolError, TransitionState, XBee,
};

/// Module sitting in transparent mode at `rate`, answering `OK` to everything
fn transparent_module(rate: u32) -> Responder {
    Box::new(move |data: &[u8], baud: u32| {
        if baud != rate {
            return None;
        }
        if data == b"+++" || data.ends_with(b"\r") {
            Some(b"OK\r".to_vec())
        } else {
            None
        }
    })
}

/// Module already in API mode, acknowledging every local AT command
fn api_module() -> Responder {
    Box::new(|data: &[u8], _baud: u32| {
        if data.first() != Some(&0x7E) {
            return None;
        }
        let request = unframe(data);
        Some(frame(&[0x88, request[1], request[2], request[3], 0x00]))
    })
}

fn text_writes(link: &MockLink) -> Vec<String> {
    link.written()
        .iter()
        .filter(|w| w.first() != Some(&0x7E))
        .map(|w| String::from_utf8_lossy(w).into_owned())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_establish_at_configured_rate() {
    let link = MockLink::new().with_responder(transparent_module(57600));
    let xbee = link.connect(config()).await;

    assert!(xbee.establish().await.unwrap());
    assert_eq!(
        text_writes(&link),
        vec!["+++", "ATBD6\r", "ATAP2\r", "ATWR\r", "ATCN\r"]
    );
    assert!(link.baud_rates().is_empty());
    assert_eq!(xbee.transition_state(), TransitionState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_establish_sweeps_baud_rates() {
    let link = MockLink::new().with_responder(transparent_module(230400));
    let xbee = link.connect(config()).await;

    assert!(xbee.establish().await.unwrap());
    assert_eq!(
        link.baud_rates(),
        vec![1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200, 230400, 57600]
    );

    let writes = text_writes(&link);
    assert_eq!(writes.iter().filter(|w| *w == "+++").count(), 10);
    assert_eq!(
        writes[writes.len() - 4..].to_vec(),
        vec!["ATBD6\r", "ATAP2\r", "ATWR\r", "ATCN\r"]
    );
    assert_eq!(xbee.transition_state(), TransitionState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_establish_gives_up_and_restores_rate() {
    let link = MockLink::new();
    let xbee = link.connect(config().with_baud_rate(115200)).await;

    assert!(!xbee.establish().await.unwrap());
    assert_eq!(link.baud_rates().last(), Some(&115200));
    assert_eq!(link.written().len(), 10);
    assert_eq!(xbee.transition_state(), TransitionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_configuration_stops_at_first_rejection() {
    let link = MockLink::new().with_responder(Box::new(|data: &[u8], _baud: u32| {
        match data {
            b"ATAP2\r" => Some(b"ERROR\r".to_vec()),
            _ => Some(b"OK\r".to_vec()),
        }
    }));
    let xbee = link.connect(config()).await;

    assert!(!xbee.establish().await.unwrap());
    assert_eq!(text_writes(&link), vec!["+++", "ATBD6\r", "ATAP2\r"]);
    assert_eq!(xbee.transition_state(), TransitionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_command_mode_value_reply() {
    let link = MockLink::new().with_responder(Box::new(|data: &[u8], _baud: u32| {
        (data == b"ATVR\r").then(|| b"10A0\r".to_vec())
    }));
    let xbee = link.connect(config()).await;

    let response = xbee
        .command_mode_at_cmd(CommandModeCommand::new("ATVR"))
        .await
        .unwrap();
    assert_eq!(response, Some(CommandModeResponse::Text("10A0".to_string())));

    let silent = xbee
        .command_mode_at_cmd(CommandModeCommand::new("ATCH"))
        .await
        .unwrap();
    assert_eq!(silent, None);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_api_mode_when_already_in_api_mode() {
    let link = MockLink::new().with_responder(api_module());
    let xbee = link.connect(config()).await;

    xbee.ensure_api_mode().await.unwrap();
    assert_eq!(link.payloads(), vec![vec![0x08, 0x01, b'A', b'P', 0x02]]);
    assert_eq!(xbee.transition_state(), TransitionState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_api_mode_falls_back_to_command_mode() {
    let link = MockLink::new().with_responder(transparent_module(57600));
    let xbee = link.connect(config()).await;

    xbee.ensure_api_mode().await.unwrap();
    let written = link.written();
    assert_eq!(written[0][0], 0x7E);
    assert_eq!(text_writes(&link)[0], "+++");
    assert_eq!(xbee.transition_state(), TransitionState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_api_mode_unavailable() {
    let link = MockLink::new();
    let xbee = link.connect(config()).await;

    assert!(matches!(
        xbee.ensure_api_mode().await,
        Err(ProtocolError::ApiModeUnavailable)
    ));
    assert_eq!(xbee.transition_state(), TransitionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_probe_finds_module() {
    let link = MockLink::new().with_responder(api_module());
    let xbee = XBee::with_opener(config(), link.opener());

    assert!(xbee.probe_device().await);
    assert!(!xbee.is_connected());
    assert_eq!(link.log.lock().unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_probe_silent_port() {
    let link = MockLink::new();
    let xbee = XBee::with_opener(config(), link.opener());

    assert!(!xbee.probe_device().await);
    assert!(!xbee.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_probe_unopenable_port() {
    let link = MockLink::new();
    link.fail_next_opens(1);
    let xbee = XBee::with_opener(config(), link.opener());

    assert!(!xbee.probe_device().await);
    assert_eq!(link.opens(), 1);
}
