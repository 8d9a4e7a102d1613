//! Control channel protocol: target → host logs, frame times and queries.
//!
//! | header | body | response | effect |
//! |---|---|---|---|
//! | `Log` | text | `ok` | [`ControlEvents::on_log`] |
//! | `Dir` | ignored | host working directory | none |
//! | `FT` | frame time in ms | `ok` | [`ControlEvents::on_frame_time`] if the body parses |
//! | other | | `ok` | none |

use crate::message::Message;
use crate::server::MessageHandler;

pub const LOG: &str = "Log";
pub const DIR: &str = "Dir";
pub const FRAME_TIME: &str = "FT";

/// Response body for every acknowledged message.
pub const OK: &str = "ok";

/// Host-side reactions to control traffic. Called on the server read loop.
pub trait ControlEvents: Send + Sync + 'static {
    fn on_log(&self, text: &str);
    fn on_frame_time(&self, frame_time_ms: f64);
}

/// [`MessageHandler`] implementing the control channel table.
pub struct ControlHandler<E> {
    events: E,
}

impl<E: ControlEvents> ControlHandler<E> {
    pub fn new(events: E) -> Self {
        Self { events }
    }
}

impl<E: ControlEvents> MessageHandler for ControlHandler<E> {
    fn handle(&self, message: &Message) -> String {
        if message.header_is(LOG) {
            self.events.on_log(&message.body);
        } else if message.header_is(DIR) {
            return std::env::current_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default();
        } else if message.header_is(FRAME_TIME) {
            // malformed samples are dropped but still acknowledged
            if let Some(frame_time) = parse_frame_time(&message.body) {
                self.events.on_frame_time(frame_time);
            }
        }
        OK.to_string()
    }
}

/// Parses an `FT` body. Non-finite values are rejected.
pub fn parse_frame_time(body: &str) -> Option<f64> {
    body.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Formats a frame time for an `FT` body.
pub fn format_frame_time(frame_time_ms: f64) -> String {
    format!("{frame_time_ms}")
}

/// `true` when a response body acknowledges the request.
pub fn is_ok(response: &str) -> bool {
    response.eq_ignore_ascii_case(OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        logs: Arc<Mutex<Vec<String>>>,
        frame_times: Arc<Mutex<Vec<f64>>>,
    }

    impl ControlEvents for Recorder {
        fn on_log(&self, text: &str) {
            self.logs.lock().unwrap().push(text.to_string());
        }
        fn on_frame_time(&self, frame_time_ms: f64) {
            self.frame_times.lock().unwrap().push(frame_time_ms);
        }
    }

    #[test]
    fn test_log_is_surfaced_once() {
        let recorder = Recorder::default();
        let handler = ControlHandler::new(recorder.clone());
        assert_eq!(handler.handle(&Message::new("Log", "hello")), "ok");
        assert_eq!(*recorder.logs.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_frame_time_notifies_with_parsed_value() {
        let recorder = Recorder::default();
        let handler = ControlHandler::new(recorder.clone());
        assert_eq!(handler.handle(&Message::new("FT", "16.6")), "ok");
        assert_eq!(*recorder.frame_times.lock().unwrap(), vec![16.6]);
    }

    #[test]
    fn test_malformed_frame_time_dropped_but_acknowledged() {
        let recorder = Recorder::default();
        let handler = ControlHandler::new(recorder.clone());
        assert_eq!(handler.handle(&Message::new("FT", "not-a-number")), "ok");
        assert_eq!(handler.handle(&Message::new("FT", "NaN")), "ok");
        assert!(recorder.frame_times.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dir_returns_working_directory() {
        let handler = ControlHandler::new(Recorder::default());
        let expected = std::env::current_dir().unwrap().display().to_string();
        assert_eq!(handler.handle(&Message::new("dir", "")), expected);
    }

    #[test]
    fn test_unknown_header_acknowledged_without_effect() {
        let recorder = Recorder::default();
        let handler = ControlHandler::new(recorder.clone());
        assert_eq!(handler.handle(&Message::new("Ping", "x")), "ok");
        assert!(recorder.logs.lock().unwrap().is_empty());
        assert!(recorder.frame_times.lock().unwrap().is_empty());
    }

    #[test]
    fn test_frame_time_formatting_parses_back() {
        let body = format_frame_time(16.6);
        assert_eq!(parse_frame_time(&body), Some(16.6));
        assert!(is_ok("OK"));
        assert!(!is_ok("error"));
    }
}
