//! Operator console
//!
//! Line commands read from stdin and turned into polling loop requests:
//! `pause`, `resume`, or a command byte in hex (`cc`, `0x11`).

use mems_scheduler::PollerControl;
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Parse one console line
pub fn parse_line(line: &str) -> Option<PollerControl> {
    let line = line.trim().to_ascii_lowercase();
    match line.as_str() {
        "" => None,
        "pause" => Some(PollerControl::Pause),
        "resume" => Some(PollerControl::Resume),
        other => {
            let digits = other.strip_prefix("0x").unwrap_or(other);
            match hex::decode(digits) {
                Ok(bytes) if !bytes.is_empty() => Some(PollerControl::SendRaw(bytes)),
                _ => None,
            }
        }
    }
}

/// Blocking reader loop; run it on its own thread
pub fn forward_lines<R: BufRead>(input: R, control: mpsc::Sender<PollerControl>) {
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        match parse_line(&line) {
            Some(request) => {
                debug!("Console request {:?}", request);
                if control.blocking_send(request).is_err() {
                    break;
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!("Unrecognised console input: {}", line.trim()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_keywords() {
        assert_eq!(parse_line("pause"), Some(PollerControl::Pause));
        assert_eq!(parse_line("  Resume \n"), Some(PollerControl::Resume));
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_line("cc"), Some(PollerControl::SendRaw(vec![0xCC])));
        assert_eq!(parse_line("0x11"), Some(PollerControl::SendRaw(vec![0x11])));
        assert_eq!(parse_line("1d0d"), Some(PollerControl::SendRaw(vec![0x1D, 0x0D])));
        assert_eq!(parse_line("abc"), None);
        assert_eq!(parse_line("zz"), None);
        assert_eq!(parse_line("0x"), None);
    }

    #[test]
    fn test_parse_non_ascii_is_rejected() {
        assert_eq!(parse_line("aéb"), None);
        assert_eq!(parse_line("é"), None);
        assert_eq!(parse_line("0xcé"), None);
    }

    #[test]
    fn test_forward_lines_survives_non_ascii() {
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(Cursor::new("aéb
resume
"), tx);

        assert_eq!(rx.try_recv().unwrap(), PollerControl::Resume);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_lines_skips_noise() {
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(Cursor::new("pause\n\nbogus\ncc\n"), tx);

        assert_eq!(rx.try_recv().unwrap(), PollerControl::Pause);
        assert_eq!(rx.try_recv().unwrap(), PollerControl::SendRaw(vec![0xCC]));
        assert!(rx.try_recv().is_err());
    }
}
