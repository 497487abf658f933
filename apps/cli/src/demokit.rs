//! DemoKit three-byte messages: command, target, value.

use std::fmt;

pub const MESSAGE_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Board input changed (button or bump switch).
    Switch,
    /// LED channel or servo speed.
    Output,
    Relay,
    Other(u8),
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            1 => Command::Switch,
            2 => Command::Output,
            3 => Command::Relay,
            other => Command::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub target: u8,
    pub value: u8,
}

impl Message {
    /// Decode the first message in `buf`. Short buffers yield `None`.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let &[command, target, value, ..] = buf else {
            return None;
        };
        Some(Self {
            command: command.into(),
            target,
            value,
        })
    }

    /// What the board does with the message.
    pub fn describe(&self) -> String {
        match (self.command, self.target) {
            (Command::Output, t @ 0..=8) => {
                let colour = ["red", "green", "blue"][usize::from(t % 3)];
                format!("LED{} {} = {}", t / 3 + 1, colour, self.value)
            }
            (Command::Output, t @ 0x10..=0x12) => {
                format!("servo{} = {:.1}%", t - 0x10 + 1, f32::from(self.value) / 2.56)
            }
            (Command::Relay, t @ 0..=1) => {
                let state = if self.value != 0 { "on" } else { "off" };
                format!("relay{} {}", t + 1, state)
            }
            (Command::Switch, t) => format!("switch{} = {}", t + 1, self.value),
            _ => format!("unhandled target 0x{:02X} = {}", self.target, self.value),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/0x{:02X}/{}", self.command, self.target, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let msg = Message::decode(&[0x02, 0x04, 0x80]).unwrap();
        assert_eq!(msg.command, Command::Output);
        assert_eq!(msg.target, 4);
        assert_eq!(msg.value, 0x80);
        assert!(Message::decode(&[0x02, 0x04]).is_none());
    }

    #[test]
    fn test_describe() {
        let led = Message::decode(&[2, 4, 200]).unwrap();
        assert_eq!(led.describe(), "LED2 green = 200");

        let servo = Message::decode(&[2, 0x11, 128]).unwrap();
        assert_eq!(servo.describe(), "servo2 = 50.0%");

        let relay = Message::decode(&[3, 0, 1]).unwrap();
        assert_eq!(relay.describe(), "relay1 on");

        let unknown = Message::decode(&[9, 0x42, 0]).unwrap();
        assert_eq!(unknown.command, Command::Other(9));
        assert!(unknown.describe().starts_with("unhandled"));
    }
}
