//! Command surface: maps host-protocol argument vectors onto a [`Shard`].
//!
//! | Command      | Arguments                        | Reply                          |
//! |--------------|----------------------------------|--------------------------------|
//! | `RG.VEC_ADD` | key blob                         | `OK`                           |
//! | `RG.VEC_SIM` | k \[filter\] blob                | `[[[key, score]...], [errors]]`|
//! | `DEL`        | key \[key ...\]                  | integer                        |
//! | `FLUSHALL`   | \[ASYNC\|SYNC\]                  | `OK`                           |
//! | `FLUSHDB`    | \[ASYNC\|SYNC\]                  | `OK`                           |
//! | `DUMP`       | key                              | bulk or nil                    |
//! | `RESTORE`    | key ttl payload \[REPLACE\]      | `OK`                           |
//! | `DBSIZE`     |                                  | integer                        |
//! | `EXPIRE`     | key seconds                      | 1 or 0                         |
//! | `PEXPIRE`    | key milliseconds                 | 1 or 0                         |
//! | `SET`        | key value                        | `OK`                           |

use crate::error::VecSimError;
use crate::keyspace::Shard;
use crate::persistence::snapshot::unix_millis;
use crate::search::SearchResponse;
use std::time::{Duration, SystemTime};

/// A protocol reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    Nil,
    Integer(i64),
    Double(f64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
    Error(String),
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

impl From<VecSimError> for Reply {
    fn from(err: VecSimError) -> Self {
        match err {
            VecSimError::BusyKey => Reply::Error("BUSYKEY Target key name already exists.".to_string()),
            VecSimError::WrongType => Reply::Error(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            ),
            other => Reply::Error(format!("ERR {}", other)),
        }
    }
}

impl From<SearchResponse> for Reply {
    fn from(resp: SearchResponse) -> Self {
        let results = resp
            .results
            .into_iter()
            .map(|r| Reply::Array(vec![Reply::Bulk(r.key.into_bytes()), Reply::Double(r.score)]))
            .collect();
        let errors = resp
            .errors
            .into_iter()
            .map(|e| Reply::Bulk(e.into_bytes()))
            .collect();
        Reply::Array(vec![Reply::Array(results), Reply::Array(errors)])
    }
}

type CommandResult = std::result::Result<Reply, Reply>;

/// Execute one command against `shard`.
pub fn execute<A: AsRef<[u8]>>(shard: &mut Shard, argv: &[A]) -> Reply {
    let Some(name) = argv.first() else {
        return Reply::Error("ERR empty command".to_string());
    };
    let name = String::from_utf8_lossy(name.as_ref()).to_ascii_uppercase();
    let args: Vec<&[u8]> = argv[1..].iter().map(|a| a.as_ref()).collect();

    let result = match name.as_str() {
        "RG.VEC_ADD" => vec_add(shard, &name, &args),
        "RG.VEC_SIM" => vec_sim(shard, &name, &args),
        "DEL" => del(shard, &name, &args),
        "FLUSHALL" | "FLUSHDB" => flush(shard, &name, &args),
        "DUMP" => dump(shard, &name, &args),
        "RESTORE" => restore(shard, &name, &args),
        "DBSIZE" => arity(&name, &args, 0, 0).map(|_| Reply::Integer(shard.dbsize() as i64)),
        "EXPIRE" => expire(shard, &name, &args, 1000),
        "PEXPIRE" => expire(shard, &name, &args, 1),
        "SET" => set(shard, &name, &args),
        _ => Err(Reply::Error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(argv[0].as_ref())
        ))),
    };
    result.unwrap_or_else(|err| err)
}

fn vec_add(shard: &mut Shard, name: &str, args: &[&[u8]]) -> CommandResult {
    arity(name, args, 2, 2)?;
    let key = utf8_key(args[0])?;
    shard.add(key, args[1])?;
    Ok(Reply::Ok)
}

fn vec_sim(shard: &mut Shard, name: &str, args: &[&[u8]]) -> CommandResult {
    arity(name, args, 2, 3)?;
    let k: i64 = parse_int(args[0], "Failed extracting <k>")?;
    let (filter, query) = if args.len() == 3 {
        (Some(utf8_key(args[1])?), args[2])
    } else {
        (None, args[1])
    };
    Ok(shard.sim(k, filter, query)?.into())
}

fn del(shard: &mut Shard, name: &str, args: &[&[u8]]) -> CommandResult {
    arity(name, args, 1, usize::MAX)?;
    let keys = args.iter().map(|k| utf8_key(k)).collect::<Result<Vec<_>, _>>()?;
    Ok(Reply::Integer(shard.del(&keys) as i64))
}

fn flush(shard: &mut Shard, name: &str, args: &[&[u8]]) -> CommandResult {
    arity(name, args, 0, 1)?;
    if let Some(mode) = args.first() {
        if !mode.eq_ignore_ascii_case(b"ASYNC") && !mode.eq_ignore_ascii_case(b"SYNC") {
            return Err(Reply::Error("ERR syntax error".to_string()));
        }
    }
    shard.flush();
    Ok(Reply::Ok)
}

fn dump(shard: &mut Shard, name: &str, args: &[&[u8]]) -> CommandResult {
    arity(name, args, 1, 1)?;
    let key = utf8_key(args[0])?;
    Ok(match shard.dump(key)? {
        Some(payload) => Reply::Bulk(payload),
        None => Reply::Nil,
    })
}

fn restore(shard: &mut Shard, name: &str, args: &[&[u8]]) -> CommandResult {
    arity(name, args, 3, 4)?;
    let key = utf8_key(args[0])?;
    let ttl_ms: i64 = parse_int(args[1], "Invalid TTL value, must be >= 0")?;
    if ttl_ms < 0 {
        return Err(Reply::Error("ERR Invalid TTL value, must be >= 0".to_string()));
    }
    let replace = match args.get(3) {
        Some(opt) if opt.eq_ignore_ascii_case(b"REPLACE") => true,
        Some(_) => return Err(Reply::Error("ERR syntax error".to_string())),
        None => false,
    };
    let ttl_ms = ttl_millis(name, ttl_ms, 1)?;
    let ttl = (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms as u64));
    match shard.restore(key, ttl, args[2], replace) {
        Ok(()) => Ok(Reply::Ok),
        Err(VecSimError::InvalidExpireTime) => Err(invalid_expire_time(name)),
        Err(e) => Err(e.into()),
    }
}

fn expire(
    shard: &mut Shard,
    name: &str,
    args: &[&[u8]],
    millis_per_unit: i64,
) -> CommandResult {
    arity(name, args, 2, 2)?;
    let key = utf8_key(args[0])?;
    let amount: i64 = parse_int(args[1], "value is not an integer or out of range")?;
    let ttl = Duration::from_millis(ttl_millis(name, amount, millis_per_unit)?.max(0) as u64);
    match shard.expire(key, ttl) {
        Ok(applied) => Ok(Reply::Integer(applied as i64)),
        Err(VecSimError::InvalidExpireTime) => Err(invalid_expire_time(name)),
        Err(e) => Err(e.into()),
    }
}

fn set(shard: &mut Shard, name: &str, args: &[&[u8]]) -> CommandResult {
    arity(name, args, 2, 2)?;
    let key = utf8_key(args[0])?;
    shard.set_foreign(key, args[1].to_vec());
    Ok(Reply::Ok)
}

fn arity(name: &str, args: &[&[u8]], min: usize, max: usize) -> Result<(), Reply> {
    if args.len() < min || args.len() > max {
        return Err(Reply::Error(format!(
            "ERR wrong number of arguments for '{}' command",
            name.to_ascii_lowercase()
        )));
    }
    Ok(())
}

/// `amount` units in milliseconds. Rejected when the absolute unix-ms
/// deadline would not fit in an `i64`.
fn ttl_millis(name: &str, amount: i64, millis_per_unit: i64) -> Result<i64, Reply> {
    let now = i64::try_from(unix_millis(SystemTime::now())).unwrap_or(i64::MAX);
    amount
        .checked_mul(millis_per_unit)
        .filter(|ms| ms.checked_add(now).is_some())
        .ok_or_else(|| invalid_expire_time(name))
}

fn invalid_expire_time(name: &str) -> Reply {
    Reply::Error(format!(
        "ERR invalid expire time in '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn utf8_key(raw: &[u8]) -> Result<&str, Reply> {
    std::str::from_utf8(raw).map_err(|_| Reply::Error("ERR key is not valid UTF-8".to_string()))
}

fn parse_int(raw: &[u8], message: &str) -> Result<i64, Reply> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| Reply::Error(format!("ERR {}", message)))
}
