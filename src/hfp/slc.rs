// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The service level connection: the AT-command channel established with a
//! hands-free or headset device before voice audio can flow.
//!
//! Commands arrive as `\r`-terminated ASCII lines; responses are framed as
//! `\r\n<text>\r\n`. The channel is UNINITIALIZED until the hands-free
//! side's `AT+CMER` completes, which happens exactly once. Telephony
//! actions the gateway cannot perform itself (answer, dial, hang up, gain
//! changes) are surfaced as [`SlcEvent`]s for the caller to act on.

use std::io::{Read, Write};

use thiserror::Error;
use tracing::{debug, warn};

use crate::hfp::indicators::{AgIndicators, Indicator, CIND_SUPPORTED};

/// Size of the line accumulation buffer. A command longer than this is a
/// protocol error and gets discarded wholesale.
pub const SLC_BUF_SIZE: usize = 256;

/// The AG feature mask answered to `AT+BRSF`: enhanced call status only.
pub const AG_SUPPORTED_FEATURES: u32 = 1 << 6;

/// Terminal conditions of the channel. Both mean the caller must tear the
/// channel down; `HangUp` additionally reflects a deliberate gesture from
/// the hands-free side rather than a transport failure.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlcError {
    #[error("Command channel disconnected")]
    Disconnected,

    /// `AT+CKPD` during a call: the headset button doubles as hang-up, and
    /// the channel is expected to be dropped along with the call.
    #[error("Hang-up gesture from the hands-free device")]
    HangUp,
}

/// Telephony requests decoded from the hands-free device, drained by the
/// caller after [`SlcChannel::handle_data_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlcEvent {
    /// The service level connection completed (`AT+CMER` accepted).
    Initialized,
    /// `ATA`: answer the incoming call.
    Answer,
    /// `AT+CHUP` or the `AT+CKPD` gesture: terminate the call.
    HangUp,
    /// `ATD` or `AT+BLDN`: an outgoing call is being set up.
    DialingStarted,
    /// `AT+VGS`: hands-free speaker gain, rescaled to 0..=100.
    SpeakerGain(u8),
    /// `AT+VGM`: hands-free microphone gain, rescaled to 0..=100.
    MicGain(u8),
}

type Handler<S> = fn(&mut SlcChannel<S>, &str, &mut Vec<SlcEvent>) -> Result<(), SlcError>;

/// One AT-command channel bound to an RFCOMM socket.
pub struct SlcChannel<S: Read + Write> {
    sock: S,
    buf: [u8; SLC_BUF_SIZE],
    read_idx: usize,
    write_idx: usize,
    initialized: bool,
    ind_event_report: bool,
    cli_active: bool,
    is_hsp: bool,
    indicators: AgIndicators,
}

impl<S: Read + Write> SlcChannel<S> {
    pub fn new(sock: S, is_hsp: bool) -> Self {
        Self {
            sock,
            buf: [0; SLC_BUF_SIZE],
            read_idx: 0,
            write_idx: 0,
            initialized: false,
            ind_event_report: false,
            cli_active: false,
            is_hsp,
            indicators: AgIndicators::default(),
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_hsp(&self) -> bool {
        self.is_hsp
    }

    pub fn indicators(&self) -> &AgIndicators {
        &self.indicators
    }

    /// Whether the hands-free side enabled calling line identification.
    pub fn cli_active(&self) -> bool {
        self.cli_active
    }

    /// Read available bytes from the socket and process every complete
    /// command line. Returns the telephony events decoded from them.
    pub fn handle_data_ready(&mut self) -> Result<Vec<SlcEvent>, SlcError> {
        let n = self
            .sock
            .read(&mut self.buf[self.write_idx..])
            .map_err(|_| SlcError::Disconnected)?;
        if n == 0 {
            return Err(SlcError::Disconnected);
        }
        self.write_idx += n;

        let mut events = Vec::new();
        loop {
            let pending = &self.buf[self.read_idx..self.write_idx];
            let Some(pos) = pending.iter().position(|&b| b == b'\r') else { break };
            let line = String::from_utf8_lossy(&pending[..pos])
                .trim_matches(|c| c == '\n' || c == ' ')
                .to_string();
            self.read_idx += pos + 1;
            if !line.is_empty() {
                self.dispatch(&line, &mut events)?;
            }
        }

        if self.read_idx == self.write_idx {
            self.read_idx = 0;
            self.write_idx = 0;
        } else if self.write_idx == SLC_BUF_SIZE && self.read_idx == 0 {
            // A full buffer with no terminator cannot be a valid command;
            // drop it so the channel resynchronizes on the next line.
            warn!("AT command exceeds {} bytes, discarding", SLC_BUF_SIZE);
            self.write_idx = 0;
        } else if self.read_idx > 0 {
            // Compact the unread tail to the front to make room.
            self.buf.copy_within(self.read_idx..self.write_idx, 0);
            self.write_idx -= self.read_idx;
            self.read_idx = 0;
        }
        Ok(events)
    }

    fn dispatch(&mut self, line: &str, events: &mut Vec<SlcEvent>) -> Result<(), SlcError> {
        // Longest applicable prefix wins, so e.g. AT+CHLD is never
        // swallowed by a shorter entry.
        let table: [(&str, Handler<S>); 19] = [
            ("ATA", Self::handle_answer),
            ("ATD", Self::handle_dial),
            ("AT+BLDN", Self::handle_dial),
            ("AT+BRSF", Self::handle_supported_features),
            ("AT+CIND", Self::handle_indicators),
            ("AT+CMER", Self::handle_event_reporting),
            ("AT+CHUP", Self::handle_hang_up),
            ("AT+CKPD", Self::handle_key_press),
            ("AT+VGS", Self::handle_speaker_gain),
            ("AT+VGM", Self::handle_mic_gain),
            ("AT+CHLD", Self::handle_call_hold),
            ("AT+CLIP", Self::handle_call_line_id),
            ("AT+COPS", Self::handle_operator),
            ("AT+CLCC", Self::handle_ok),
            ("AT+CNUM", Self::handle_ok),
            ("AT+CCWA", Self::handle_ok),
            ("AT+CMEE", Self::handle_ok),
            ("AT+BIA", Self::handle_ok),
            ("AT+VTS", Self::handle_ok),
        ];
        let best = table
            .into_iter()
            .filter(|(prefix, _)| line.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len());
        match best {
            Some((_, handler)) => handler(self, line, events),
            None => {
                debug!("Unrecognized AT command: {line}");
                self.reply("ERROR")
            }
        }
    }

    fn reply(&mut self, text: &str) -> Result<(), SlcError> {
        self.sock
            .write_all(format!("\r\n{text}\r\n").as_bytes())
            .map_err(|_| SlcError::Disconnected)
    }

    /// Set an indicator and push `+CIEV` when unsolicited reporting is in
    /// effect for this channel.
    fn update_indicator(&mut self, indicator: Indicator, value: u8) -> Result<(), SlcError> {
        let slot = match indicator {
            Indicator::BatteryCharge => &mut self.indicators.battery,
            Indicator::Signal => &mut self.indicators.signal,
            Indicator::Service => &mut self.indicators.service,
            Indicator::Call => &mut self.indicators.call,
            Indicator::CallSetup => &mut self.indicators.callsetup,
            Indicator::CallHeld => &mut self.indicators.callheld,
            Indicator::Roam => &mut self.indicators.roam,
        };
        if *slot == value {
            return Ok(());
        }
        *slot = value;
        if self.initialized && !self.is_hsp && self.ind_event_report {
            self.reply(&format!("+CIEV: {},{}", indicator.index(), value))?;
        }
        Ok(())
    }

    /// Public indicator setters for the telephony owner.
    pub fn set_battery(&mut self, level: u8) -> Result<(), SlcError> {
        self.update_indicator(Indicator::BatteryCharge, level.min(5))
    }

    pub fn set_signal(&mut self, level: u8) -> Result<(), SlcError> {
        self.update_indicator(Indicator::Signal, level.min(5))
    }

    pub fn set_service(&mut self, available: bool) -> Result<(), SlcError> {
        self.update_indicator(Indicator::Service, available as u8)
    }

    pub fn set_call(&mut self, active: bool) -> Result<(), SlcError> {
        self.update_indicator(Indicator::Call, active as u8)
    }

    pub fn set_callheld(&mut self, held: u8) -> Result<(), SlcError> {
        self.update_indicator(Indicator::CallHeld, held.min(2))
    }

    pub fn set_roam(&mut self, roaming: bool) -> Result<(), SlcError> {
        self.update_indicator(Indicator::Roam, roaming as u8)
    }

    /// Push the gateway's speaker volume to the hands-free device,
    /// rescaled from 0..=100 to the HFP 0..=15 gain range.
    pub fn send_speaker_gain(&mut self, volume: u8) -> Result<(), SlcError> {
        self.reply(&format!("+VGS={}", volume.min(100) as u32 * 15 / 100))
    }

    /// Push the gateway's microphone gain, same rescaling as the speaker.
    pub fn send_mic_gain(&mut self, volume: u8) -> Result<(), SlcError> {
        self.reply(&format!("+VGM={}", volume.min(100) as u32 * 15 / 100))
    }

    fn handle_ok(&mut self, _line: &str, _events: &mut Vec<SlcEvent>) -> Result<(), SlcError> {
        self.reply("OK")
    }

    fn handle_answer(&mut self, _line: &str, events: &mut Vec<SlcEvent>) -> Result<(), SlcError> {
        events.push(SlcEvent::Answer);
        self.reply("OK")
    }

    fn handle_dial(&mut self, _line: &str, events: &mut Vec<SlcEvent>) -> Result<(), SlcError> {
        self.update_indicator(Indicator::CallSetup, 2)?;
        events.push(SlcEvent::DialingStarted);
        self.reply("OK")
    }

    fn handle_supported_features(
        &mut self,
        _line: &str,
        _events: &mut Vec<SlcEvent>,
    ) -> Result<(), SlcError> {
        self.reply(&format!("+BRSF: {AG_SUPPORTED_FEATURES}"))?;
        self.reply("OK")
    }

    fn handle_indicators(
        &mut self,
        line: &str,
        _events: &mut Vec<SlcEvent>,
    ) -> Result<(), SlcError> {
        if line.starts_with("AT+CIND=?") {
            self.reply(&format!("+CIND: {CIND_SUPPORTED}"))?;
        } else if line.starts_with("AT+CIND?") {
            let status = self.indicators.status_line();
            self.reply(&format!("+CIND: {status}"))?;
        } else {
            return self.reply("ERROR");
        }
        self.reply("OK")
    }

    /// `AT+CMER=<mode>,<keyp>,<disp>,<ind>`. The one command whose success
    /// completes the service level connection.
    fn handle_event_reporting(
        &mut self,
        line: &str,
        events: &mut Vec<SlcEvent>,
    ) -> Result<(), SlcError> {
        let args: Vec<&str> = match line.split_once('=') {
            Some((_, rest)) => rest.split(',').map(str::trim).collect(),
            None => Vec::new(),
        };
        if args.len() != 4 {
            return self.reply("ERROR");
        }
        self.ind_event_report = args[3] == "1";
        self.reply("OK")?;
        if !self.initialized {
            self.initialized = true;
            events.push(SlcEvent::Initialized);
        }
        Ok(())
    }

    fn handle_hang_up(&mut self, _line: &str, events: &mut Vec<SlcEvent>) -> Result<(), SlcError> {
        self.update_indicator(Indicator::Call, 0)?;
        self.update_indicator(Indicator::CallSetup, 0)?;
        events.push(SlcEvent::HangUp);
        self.reply("OK")
    }

    /// `AT+CKPD`: the single headset button. During a call it is the
    /// hang-up gesture, and the channel goes down with the call.
    fn handle_key_press(
        &mut self,
        _line: &str,
        _events: &mut Vec<SlcEvent>,
    ) -> Result<(), SlcError> {
        self.reply("OK")?;
        if self.indicators.call != 0 || self.indicators.callsetup != 0 {
            self.update_indicator(Indicator::Call, 0)?;
            self.update_indicator(Indicator::CallSetup, 0)?;
            return Err(SlcError::HangUp);
        }
        Ok(())
    }

    fn parse_gain(line: &str) -> Option<u8> {
        let (_, value) = line.split_once('=')?;
        let gain: u8 = value.trim().parse().ok()?;
        (gain <= 15).then_some(gain)
    }

    fn handle_speaker_gain(
        &mut self,
        line: &str,
        events: &mut Vec<SlcEvent>,
    ) -> Result<(), SlcError> {
        match Self::parse_gain(line) {
            Some(gain) => {
                events.push(SlcEvent::SpeakerGain(((gain as u32 + 1) * 100 / 16) as u8));
                self.reply("OK")
            }
            None => self.reply("ERROR"),
        }
    }

    fn handle_mic_gain(&mut self, line: &str, events: &mut Vec<SlcEvent>) -> Result<(), SlcError> {
        match Self::parse_gain(line) {
            Some(gain) => {
                events.push(SlcEvent::MicGain(((gain as u32 + 1) * 100 / 16) as u8));
                self.reply("OK")
            }
            None => self.reply("ERROR"),
        }
    }

    /// `AT+CHLD`: three-way calling is not in the feature mask, so only
    /// the capability query gets a real answer.
    fn handle_call_hold(
        &mut self,
        line: &str,
        _events: &mut Vec<SlcEvent>,
    ) -> Result<(), SlcError> {
        if line.starts_with("AT+CHLD=?") {
            self.reply("+CHLD: (0)")?;
        }
        self.reply("OK")
    }

    fn handle_call_line_id(
        &mut self,
        line: &str,
        _events: &mut Vec<SlcEvent>,
    ) -> Result<(), SlcError> {
        self.cli_active = matches!(line.split_once('='), Some((_, v)) if v.trim() == "1");
        self.reply("OK")
    }

    fn handle_operator(&mut self, line: &str, _events: &mut Vec<SlcEvent>) -> Result<(), SlcError> {
        if line.starts_with("AT+COPS?") {
            self.reply("+COPS: 0")?;
        }
        self.reply("OK")
    }
}
