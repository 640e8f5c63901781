use serde::{Deserialize, Serialize};

/// Instrument command vocabulary. Console commands are text lines, mode
/// changes are single control bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Sample,
    Autosample,
    Break,
    Stop,
    Exit,
    Reset,
    Save,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Sample,
        Command::Autosample,
        Command::Break,
        Command::Stop,
        Command::Exit,
        Command::Reset,
        Command::Save,
    ];

    pub fn wire(&self) -> &'static [u8] {
        match self {
            Command::Sample => b"\r",      // CR
            Command::Autosample => b"\x01", // Ctrl-A
            Command::Break => b"\x03",      // Ctrl-C
            Command::Stop => b"\x13",       // Ctrl-S
            Command::Reset => b"\x12",      // Ctrl-R
            Command::Exit => b"exit\n",
            Command::Save => b"save\n",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Sample => "SAMPLE",
            Command::Autosample => "AUTOSAMPLE",
            Command::Break => "BREAK",
            Command::Stop => "STOP",
            Command::Exit => "EXIT",
            Command::Reset => "RESET",
            Command::Save => "SAVE",
        }
    }

    /// Decode a control byte as the instrument would see it.
    pub fn from_control_byte(byte: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.wire().len() == 1 && c.wire()[0] == byte)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Prompt the console prints when it is ready for the next command.
pub const PROMPT: &str = "$";
/// Banner printed when the console is entered.
pub const COMMAND_CONSOLE: &str = "Command Console";
/// First banner line after a reset.
pub const RESET_BANNER: &str = "Satlantic PAR Sensor";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_bytes_are_unique() {
        let controls: Vec<_> = Command::ALL.into_iter().filter_map(|c| (c.wire().len() == 1).then(|| c.wire()[0])).collect();
        let mut deduped = controls.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(controls.len(), deduped.len());
        assert_eq!(Command::from_control_byte(0x03), Some(Command::Break));
        assert_eq!(Command::from_control_byte(b'x'), None);
    }
}
