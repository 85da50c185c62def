//! Typed commands built from a decoded RESP array, and the static dispatch
//! table describing argument-count bounds, write-ness, and recognized
//! options per command name.

use bytes::Bytes;

use crate::error::RespError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOptionKind {
    Ex,
    Px,
    Nx,
    Xx,
    KeepTtl,
    Get,
}

#[derive(Debug, Clone)]
pub struct CommandOption {
    pub kind: CommandOptionKind,
    pub args: Vec<Bytes>,
}

/// A parsed client command: lowercased name plus positional arguments
/// (options already extracted out of the tail of `argv` for commands that
/// accept them, per `describe_options`).
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub argv: Vec<Bytes>,
    pub options: Vec<CommandOption>,
}

struct CommandSpec {
    name: &'static str,
    min_argc: usize,
    max_argc: usize,
    is_write: bool,
}

const COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec { name: "select", min_argc: 1, max_argc: 1, is_write: false },
    CommandSpec { name: "set", min_argc: 2, max_argc: 2, is_write: true },
    CommandSpec { name: "get", min_argc: 1, max_argc: 1, is_write: false },
    CommandSpec { name: "del", min_argc: 1, max_argc: 64, is_write: true },
    CommandSpec { name: "prefix", min_argc: 1, max_argc: 1, is_write: false },
    CommandSpec { name: "multi", min_argc: 0, max_argc: 0, is_write: false },
    CommandSpec { name: "discard", min_argc: 0, max_argc: 0, is_write: false },
    CommandSpec { name: "exec", min_argc: 0, max_argc: 0, is_write: false },
    CommandSpec { name: "watch", min_argc: 1, max_argc: 1, is_write: false },
    CommandSpec { name: "unwatch", min_argc: 1, max_argc: 1, is_write: false },
    CommandSpec { name: "publish", min_argc: 2, max_argc: 2, is_write: false },
    CommandSpec { name: "subscribe", min_argc: 1, max_argc: 64, is_write: false },
    CommandSpec { name: "unsubscribe", min_argc: 1, max_argc: 64, is_write: false },
    CommandSpec { name: "merge", min_argc: 0, max_argc: 0, is_write: false },
    CommandSpec { name: "command", min_argc: 0, max_argc: 0, is_write: false },
    CommandSpec { name: "info", min_argc: 0, max_argc: 0, is_write: false },
    CommandSpec { name: "server", min_argc: 0, max_argc: 0, is_write: false },
];

fn find_spec(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|spec| spec.name == name)
}

pub fn is_write_command(name: &str) -> bool {
    find_spec(name).is_some_and(|spec| spec.is_write)
}

/// Parses a flat RESP array of bulk strings into a [`Command`]. Only `set`
/// recognizes trailing options today (`EX`/`PX`/`NX`/`XX`/`KEEPTTL`/`GET`);
/// every other command's `argv` tail is left untouched.
pub fn parse(parts: Vec<Bytes>) -> Result<Command, RespError> {
    let (name_bytes, rest) = parts.split_first().ok_or(RespError::Syntax("empty command"))?;
    let name = String::from_utf8_lossy(name_bytes).to_ascii_lowercase();

    let spec = find_spec(&name).ok_or_else(|| RespError::CommandNotFound(name.clone()))?;

    let (argv, options) = if name == "set" {
        split_set_options(rest)?
    } else {
        (rest.to_vec(), Vec::new())
    };

    if argv.len() < spec.min_argc || argv.len() > spec.max_argc {
        return Err(RespError::ArgNumbers(name));
    }

    check_option_exclusivity(&options)?;

    Ok(Command { name, argv, options })
}

fn split_set_options(rest: &[Bytes]) -> Result<(Vec<Bytes>, Vec<CommandOption>), RespError> {
    // `SET key value [EX sec | PX ms | KEEPTTL] [NX | XX] [GET]`
    if rest.len() < 2 {
        return Ok((rest.to_vec(), Vec::new()));
    }
    let argv = rest[..2].to_vec();
    let mut options = Vec::new();
    let mut i = 2;
    while i < rest.len() {
        let token = String::from_utf8_lossy(&rest[i]).to_ascii_lowercase();
        match token.as_str() {
            "ex" => {
                let value = rest.get(i + 1).cloned().ok_or(RespError::ArgNumbers("set".into()))?;
                options.push(CommandOption { kind: CommandOptionKind::Ex, args: vec![value] });
                i += 2;
            }
            "px" => {
                let value = rest.get(i + 1).cloned().ok_or(RespError::ArgNumbers("set".into()))?;
                options.push(CommandOption { kind: CommandOptionKind::Px, args: vec![value] });
                i += 2;
            }
            "nx" => {
                options.push(CommandOption { kind: CommandOptionKind::Nx, args: Vec::new() });
                i += 1;
            }
            "xx" => {
                options.push(CommandOption { kind: CommandOptionKind::Xx, args: Vec::new() });
                i += 1;
            }
            "keepttl" => {
                options.push(CommandOption { kind: CommandOptionKind::KeepTtl, args: Vec::new() });
                i += 1;
            }
            "get" => {
                options.push(CommandOption { kind: CommandOptionKind::Get, args: Vec::new() });
                i += 1;
            }
            _ => return Err(RespError::Syntax("unknown SET option")),
        }
    }
    Ok((argv, options))
}

fn check_option_exclusivity(options: &[CommandOption]) -> Result<(), RespError> {
    use CommandOptionKind::{Ex, KeepTtl, Nx, Px, Xx};

    let has = |kind: CommandOptionKind| options.iter().any(|o| o.kind == kind);

    let ttl_variants = [has(Ex), has(Px), has(KeepTtl)].iter().filter(|b| **b).count();
    if ttl_variants > 1 {
        return Err(RespError::OptionExclusive);
    }
    if has(Nx) && has(Xx) {
        return Err(RespError::OptionExclusive);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn parses_plain_set() {
        let cmd = parse(vec![bulk("SET"), bulk("k"), bulk("v")]).unwrap();
        assert_eq!(cmd.name, "set");
        assert_eq!(cmd.argv, vec![bulk("k"), bulk("v")]);
        assert!(cmd.options.is_empty());
    }

    #[test]
    fn parses_set_with_ex_and_nx() {
        let cmd = parse(vec![bulk("set"), bulk("k"), bulk("v"), bulk("EX"), bulk("5"), bulk("NX")]).unwrap();
        assert_eq!(cmd.options.len(), 2);
    }

    #[test]
    fn rejects_ex_and_px_together() {
        let err = parse(vec![
            bulk("set"), bulk("k"), bulk("v"), bulk("EX"), bulk("5"), bulk("PX"), bulk("5"),
        ])
        .unwrap_err();
        assert_eq!(err, RespError::OptionExclusive);
    }

    #[test]
    fn rejects_unknown_command() {
        let err = parse(vec![bulk("bogus")]).unwrap_err();
        assert!(matches!(err, RespError::CommandNotFound(_)));
    }

    #[test]
    fn rejects_wrong_argc() {
        let err = parse(vec![bulk("get")]).unwrap_err();
        assert!(matches!(err, RespError::ArgNumbers(_)));
    }
}
