//! Five-way joystick input from the board's evdev node.

use std::path::Path;

use evdev::{Device, EventType, InputEvent, KeyCode};
use hatdash_core::{DisplayInput, Error, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Middle,
}

/// Maps a joystick press to a display input. Left is unassigned.
pub fn joystick_input(direction: Direction) -> Option<DisplayInput> {
    match direction {
        Direction::Right => Some(DisplayInput::ModeNext),
        Direction::Middle => Some(DisplayInput::TogglePower),
        Direction::Up => Some(DisplayInput::SetLowLight(false)),
        Direction::Down => Some(DisplayInput::SetLowLight(true)),
        Direction::Left => None,
    }
}

const KEY_RELEASE: i32 = 0;

/// Direction for a key press or auto-repeat; releases and other keys give `None`.
pub fn key_direction(key: KeyCode, value: i32) -> Option<Direction> {
    if value == KEY_RELEASE {
        return None;
    }
    match key {
        KeyCode::KEY_UP => Some(Direction::Up),
        KeyCode::KEY_DOWN => Some(Direction::Down),
        KeyCode::KEY_LEFT => Some(Direction::Left),
        KeyCode::KEY_RIGHT => Some(Direction::Right),
        KeyCode::KEY_ENTER => Some(Direction::Middle),
        _ => None,
    }
}

fn event_direction(event: &InputEvent) -> Option<Direction> {
    if event.event_type() != EventType::KEY {
        return None;
    }
    key_direction(KeyCode(event.code()), event.value())
}

/// Forwards joystick presses to the display until shutdown or the device goes away.
pub async fn run_joystick(
    path: &Path,
    inputs: mpsc::UnboundedSender<DisplayInput>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let fault = |e: std::io::Error| Error::DisplayDeviceFault(format!("{}: {e}", path.display()));
    let device = Device::open(path).map_err(fault)?;
    let name = device.name().unwrap_or("joystick").to_string();
    let mut events = device.into_event_stream().map_err(fault)?;
    info!(path = %path.display(), %name, "joystick attached");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = events.next_event() => {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(path = %path.display(), "joystick read failed: {e}");
                        break;
                    }
                };
                let Some(direction) = event_direction(&event) else {
                    continue;
                };
                debug!(?direction, "joystick");
                if let Some(input) = joystick_input(direction) {
                    if inputs.send(input).is_err() {
                        break;
                    }
                }
            }
        }
    }
    info!("joystick detached");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_and_hold_decoded() {
        assert_eq!(key_direction(KeyCode::KEY_RIGHT, 1), Some(Direction::Right));
        assert_eq!(key_direction(KeyCode::KEY_UP, 2), Some(Direction::Up));
        assert_eq!(key_direction(KeyCode::KEY_ENTER, 1), Some(Direction::Middle));
    }

    #[test]
    fn test_release_and_other_keys_ignored() {
        assert_eq!(key_direction(KeyCode::KEY_UP, 0), None);
        assert_eq!(key_direction(KeyCode::KEY_A, 1), None);
    }

    #[test]
    fn test_direction_mapping() {
        assert_eq!(joystick_input(Direction::Right), Some(DisplayInput::ModeNext));
        assert_eq!(joystick_input(Direction::Middle), Some(DisplayInput::TogglePower));
        assert_eq!(joystick_input(Direction::Down), Some(DisplayInput::SetLowLight(true)));
        assert_eq!(joystick_input(Direction::Up), Some(DisplayInput::SetLowLight(false)));
        assert_eq!(joystick_input(Direction::Left), None);
    }

    #[tokio::test]
    async fn test_missing_device() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop, stop_rx) = watch::channel(false);
        let err = run_joystick(Path::new("/nonexistent/event9"), tx, stop_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DisplayDeviceFault(_)));
    }

    #[tokio::test]
    async fn test_plain_file_is_not_an_input_device() {
        let path = crate::testutil::scratch_dir("joy").join("event3");
        std::fs::write(&path, [0u8; 48]).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop, stop_rx) = watch::channel(false);
        let err = run_joystick(&path, tx, stop_rx).await.unwrap_err();
        assert!(matches!(err, Error::DisplayDeviceFault(_)));
    }
}
