// src/core/protocol/command.rs

//! The typed command grammar: turns a raw `Request` into a `WireCommand`
//! and back. `PWRT`, `PREP`, `COMM`, `ABRT` are internal to the replication
//! protocol and never sent by a client.
//!
//! Redesign note (see DESIGN.md): an earlier design called for `SECY`/
//! `SECN`/`ACKD` as distinct wire tags a secondary sends back to the
//! primary. This implementation instead carries that information as the
//! `Reply` to the
//! `PREP`/`COMM` request itself (a `+OK` reply to `PREP` *is* a `SECY` vote,
//! a `-ER` reply *is* a `SECN` vote with its reason; a `+OK` reply to `COMM`
//! *is* `ACKD`), since every node-to-node call in this system is already a
//! synchronous request/reply round trip. No separate frames are needed to
//! carry the same three bits of information.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::errors::KvError;
use crate::core::protocol::wire::Request;

fn parse_seq(field: &Bytes) -> Result<u64, KvError> {
    std::str::from_utf8(field)
        .map_err(|e| KvError::MalformedRequest(e.to_string()))?
        .parse::<u64>()
        .map_err(KvError::from)
}

fn seq_field(seq: u64) -> Bytes {
    Bytes::from(seq.to_string())
}

/// A fully parsed request, client-facing or internal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    GetRow { row: Bytes },
    GetValue { row: Bytes, col: Bytes },
    GetAllRows,
    PutValue { row: Bytes, col: Bytes, value: Bytes },
    CondPutValue { row: Bytes, col: Bytes, expected: Bytes, new_value: Bytes },
    DeleteRow { row: Bytes },
    DeleteValue { row: Bytes, col: Bytes },
    RenameRow { old: Bytes, new: Bytes },
    RenameCol { row: Bytes, old: Bytes, new: Bytes },
    Kill,
    Wake,

    /// A write forwarded to the primary by a secondary that received it
    /// directly from a client. Carries the original
    /// client-facing request, fully self-delimited via its own encoding.
    ForwardedWrite { inner: Request },
    /// `PREPARE(seq, row, op)`: the primary assigns `seq` and broadcasts the
    /// write to every secondary before applying it locally. The reply
    /// carries the secondary's vote (see module docs).
    Prepare { seq: u64, row: Bytes, op: Request },
    /// `COMMIT(seq)`: the primary has decided to apply `seq`; the reply
    /// carries the secondary's ack once it has done likewise.
    Commit { seq: u64 },
    /// `ABORT(seq)`: the primary has decided to discard `seq`.
    Abort { seq: u64 },
}

impl WireCommand {
    pub fn parse(req: &Request) -> Result<Self, KvError> {
        match &req.tag {
            b"GETR" => Ok(WireCommand::GetRow { row: req.fields(1)?.remove(0) }),
            b"GETV" => {
                let mut f = req.fields(2)?;
                let col = f.remove(1);
                let row = f.remove(0);
                Ok(WireCommand::GetValue { row, col })
            }
            b"GETA" => {
                req.fields(0)?;
                Ok(WireCommand::GetAllRows)
            }
            b"PUTV" => {
                let mut f = req.fields(3)?;
                let value = f.remove(2);
                let col = f.remove(1);
                let row = f.remove(0);
                Ok(WireCommand::PutValue { row, col, value })
            }
            b"CPUT" => {
                let (row, col, expected, new_value) = req.cput_fields()?;
                Ok(WireCommand::CondPutValue { row, col, expected, new_value })
            }
            b"DELR" => Ok(WireCommand::DeleteRow { row: req.fields(1)?.remove(0) }),
            b"DELV" => {
                let mut f = req.fields(2)?;
                let col = f.remove(1);
                let row = f.remove(0);
                Ok(WireCommand::DeleteValue { row, col })
            }
            b"RNMR" => {
                let mut f = req.fields(2)?;
                let new = f.remove(1);
                let old = f.remove(0);
                Ok(WireCommand::RenameRow { old, new })
            }
            b"RNMC" => {
                let mut f = req.fields(3)?;
                let new = f.remove(2);
                let old = f.remove(1);
                let row = f.remove(0);
                Ok(WireCommand::RenameCol { row, old, new })
            }
            b"KILL" => {
                req.fields(0)?;
                Ok(WireCommand::Kill)
            }
            b"WAKE" => {
                req.fields(0)?;
                Ok(WireCommand::Wake)
            }
            b"PWRT" => {
                let nested = req.fields(1)?.remove(0);
                let inner = Request::decode(nested)?;
                Ok(WireCommand::ForwardedWrite { inner })
            }
            b"PREP" => {
                let mut f = req.fields(3)?;
                let nested = f.remove(2);
                let row = f.remove(1);
                let seq = parse_seq(&f.remove(0))?;
                let op = Request::decode(nested)?;
                Ok(WireCommand::Prepare { seq, row, op })
            }
            b"COMM" => Ok(WireCommand::Commit { seq: parse_seq(&req.fields(1)?.remove(0))? }),
            b"ABRT" => Ok(WireCommand::Abort { seq: parse_seq(&req.fields(1)?.remove(0))? }),
            other => Err(KvError::MalformedRequest(format!(
                "unknown command tag {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Serializes this command back into a `Request`, for the direction in
    /// which this process is the sender (a secondary forwarding a write, a
    /// primary fanning out `PREP`/`COMM`/`ABRT`, or an admin client issuing
    /// `KILL`/`WAKE`/gets).
    pub fn to_request(&self) -> Request {
        fn join(fields: &[&[u8]]) -> Bytes {
            let mut buf = BytesMut::new();
            for (i, f) in fields.iter().enumerate() {
                if i > 0 {
                    buf.put_u8(super::wire::DELIM);
                }
                buf.put_slice(f);
            }
            buf.freeze()
        }

        match self {
            WireCommand::GetRow { row } => Request::new(b"GETR", row.clone()),
            WireCommand::GetValue { row, col } => Request::new(b"GETV", join(&[row, col])),
            WireCommand::GetAllRows => Request::new(b"GETA", Bytes::new()),
            WireCommand::PutValue { row, col, value } => {
                Request::new(b"PUTV", join(&[row, col, value]))
            }
            WireCommand::CondPutValue { row, col, expected, new_value } => {
                let mut buf = BytesMut::new();
                buf.put_slice(row);
                buf.put_u8(super::wire::DELIM);
                buf.put_slice(col);
                buf.put_u8(super::wire::DELIM);
                buf.put_u32(expected.len() as u32);
                buf.put_slice(expected);
                buf.put_slice(new_value);
                Request::new(b"CPUT", buf.freeze())
            }
            WireCommand::DeleteRow { row } => Request::new(b"DELR", row.clone()),
            WireCommand::DeleteValue { row, col } => Request::new(b"DELV", join(&[row, col])),
            WireCommand::RenameRow { old, new } => Request::new(b"RNMR", join(&[old, new])),
            WireCommand::RenameCol { row, old, new } => {
                Request::new(b"RNMC", join(&[row, old, new]))
            }
            WireCommand::Kill => Request::new(b"KILL", Bytes::new()),
            WireCommand::Wake => Request::new(b"WAKE", Bytes::new()),
            WireCommand::ForwardedWrite { inner } => Request::new(b"PWRT", inner.encode()),
            WireCommand::Prepare { seq, row, op } => {
                Request::new(b"PREP", join(&[&seq_field(*seq), row, &op.encode()]))
            }
            WireCommand::Commit { seq } => Request::new(b"COMM", seq_field(*seq)),
            WireCommand::Abort { seq } => Request::new(b"ABRT", seq_field(*seq)),
        }
    }

    /// Whether this command mutates tablet state (as opposed to a read or
    /// a control message).
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            WireCommand::PutValue { .. }
                | WireCommand::CondPutValue { .. }
                | WireCommand::DeleteRow { .. }
                | WireCommand::DeleteValue { .. }
                | WireCommand::RenameRow { .. }
                | WireCommand::RenameCol { .. }
        )
    }

    /// The row a write command targets, used to key the 2PC row lock.
    pub fn target_row(&self) -> Option<&Bytes> {
        match self {
            WireCommand::PutValue { row, .. }
            | WireCommand::CondPutValue { row, .. }
            | WireCommand::DeleteRow { row }
            | WireCommand::DeleteValue { row, .. }
            | WireCommand::RenameRow { old: row, .. }
            | WireCommand::RenameCol { row, .. } => Some(row),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(cmd: WireCommand) -> WireCommand {
        let req = cmd.to_request();
        let payload = req.encode();
        let decoded = Request::decode(payload).unwrap();
        WireCommand::parse(&decoded).unwrap()
    }

    #[test]
    fn put_value_round_trips() {
        let cmd = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"30"),
        };
        assert_eq!(round_trip(cmd.clone()), cmd);
    }

    #[test]
    fn cond_put_round_trips_with_binary_values() {
        let cmd = WireCommand::CondPutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"bio"),
            expected: Bytes::from_static(b"old\x08value"),
            new_value: Bytes::from_static(b"new\x08value"),
        };
        assert_eq!(round_trip(cmd.clone()), cmd);
    }

    #[test]
    fn prepare_round_trips_nested_op() {
        let op = WireCommand::PutValue {
            row: Bytes::from_static(b"alice"),
            col: Bytes::from_static(b"age"),
            value: Bytes::from_static(b"31"),
        }
        .to_request();
        let cmd = WireCommand::Prepare { seq: 42, row: Bytes::from_static(b"alice"), op };
        assert_eq!(round_trip(cmd.clone()), cmd);
    }

    #[test]
    fn commit_and_abort_round_trip() {
        assert_eq!(round_trip(WireCommand::Commit { seq: 7 }), WireCommand::Commit { seq: 7 });
        assert_eq!(round_trip(WireCommand::Abort { seq: 9 }), WireCommand::Abort { seq: 9 });
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let req = Request::new(b"XXXX", Bytes::new());
        assert!(matches!(WireCommand::parse(&req), Err(KvError::MalformedRequest(_))));
    }

    #[test]
    fn target_row_is_none_for_reads_and_controls() {
        assert_eq!(WireCommand::GetAllRows.target_row(), None);
        assert_eq!(WireCommand::Kill.target_row(), None);
    }
}
