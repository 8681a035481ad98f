//! Request commands understood by units and distributors

use std::fmt;

use serde_json::Value;
use stem_core::Meta;

/// The `command` key of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Run,
    Structure,
    Powerfullity,
    Stop,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Run => "run",
            Command::Structure => "structure",
            Command::Powerfullity => "powerfullity",
            Command::Stop => "stop",
        }
    }

    /// Read the command of a request, or the error text to answer with
    pub fn from_meta(meta: &Meta) -> Result<Self, String> {
        match meta.get("command") {
            None => Err("KeyError: command".to_string()),
            Some(Value::String(name)) => match name.as_str() {
                "run" => Ok(Command::Run),
                "structure" => Ok(Command::Structure),
                "powerfullity" => Ok(Command::Powerfullity),
                "stop" => Ok(Command::Stop),
                other => Err(format!("unknown command: {}", other)),
            },
            Some(other) => Err(format!("unknown command: {}", other)),
        }
    }

    /// A request meta carrying only this command
    pub fn request(self) -> Meta {
        Meta::new().with("command", self.as_str())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_meta() {
        assert_eq!(Command::from_meta(&Command::Run.request()), Ok(Command::Run));
        assert_eq!(
            Command::from_meta(&Meta::new()),
            Err("KeyError: command".to_string())
        );
        assert_eq!(
            Command::from_meta(&Meta::new().with("command", "dance")),
            Err("unknown command: dance".to_string())
        );
        assert_eq!(
            Command::from_meta(&Meta::new().with("command", 3)),
            Err("unknown command: 3".to_string())
        );
    }
}
