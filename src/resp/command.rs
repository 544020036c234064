use super::error::CodecError;

/// One of the four data-plane commands plus the handshake, as decoded from
/// a pipeline's leading bulk string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Hello,
    Get,
    Set,
    Del,
    Keys,
}

impl Command {
    /// Parses a command name by comparing its first three bytes as a
    /// 24-bit little-endian integer against the known prefixes, then
    /// checking total length and required suffix to split look-alikes
    /// (`HEL` + `LO`, `KEY` + `S`). Anything else is a soft "unknown
    /// command" error -- the pipeline is resynchronized by the caller, not
    /// by this function.
    pub fn parse(name: &[u8]) -> Result<Self, CodecError> {
        if name.len() < 3 {
            return Err(unknown(name));
        }
        let prefix = prefix24(&name[..3]);
        match name.len() {
            3 if prefix == prefix24(b"GET") => Ok(Command::Get),
            3 if prefix == prefix24(b"SET") => Ok(Command::Set),
            3 if prefix == prefix24(b"DEL") => Ok(Command::Del),
            4 if prefix == prefix24(b"KEY") && name[3] == b'S' => Ok(Command::Keys),
            5 if prefix == prefix24(b"HEL") && &name[3..] == b"LO" => Ok(Command::Hello),
            _ => Err(unknown(name)),
        }
    }
}

fn prefix24(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

fn unknown(name: &[u8]) -> CodecError {
    CodecError::Soft(format!(
        "the command {} is invalid",
        String::from_utf8_lossy(name)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_every_known_command() {
        assert_eq!(Command::parse(b"GET").unwrap(), Command::Get);
        assert_eq!(Command::parse(b"SET").unwrap(), Command::Set);
        assert_eq!(Command::parse(b"DEL").unwrap(), Command::Del);
        assert_eq!(Command::parse(b"KEYS").unwrap(), Command::Keys);
        assert_eq!(Command::parse(b"HELLO").unwrap(), Command::Hello);
    }

    #[test]
    fn rejects_look_alikes_by_length_and_suffix() {
        assert!(Command::parse(b"GETS").is_err());
        assert!(Command::parse(b"HELLA").is_err());
        assert!(Command::parse(b"KEYX").is_err());
        assert!(Command::parse(b"HE").is_err());
    }

    #[test]
    fn unknown_command_reports_its_own_name() {
        match Command::parse(b"FOO") {
            Err(CodecError::Soft(msg)) => assert_eq!(msg, "the command FOO is invalid"),
            other => panic!("expected soft error, got {other:?}"),
        }
    }
}
