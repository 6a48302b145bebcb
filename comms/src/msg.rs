use std::{borrow::Cow, fmt, io};

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const KIND_ERR: Header = 0;
const KIND_CONTROL: Header = 1;
const KIND_DATA: Header = 2;

/// How the values contributed by every rank are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceOp {
    Sum,
    Average,
    Min,
    Max,
}

impl ReduceOp {
    /// Folds `value` into `acc` element-wise.
    ///
    /// `Average` accumulates a sum, callers divide by the number of contributions with
    /// `ReduceOp::finish` once every rank has been folded in.
    pub fn fold(self, acc: &mut [f32], value: &[f32]) {
        match self {
            ReduceOp::Sum | ReduceOp::Average => {
                acc.iter_mut().zip(value).for_each(|(a, v)| *a += v);
            }
            ReduceOp::Min => acc.iter_mut().zip(value).for_each(|(a, v)| *a = a.min(*v)),
            ReduceOp::Max => acc.iter_mut().zip(value).for_each(|(a, v)| *a = a.max(*v)),
        }
    }

    /// Completes a reduction over `contributions` ranks.
    pub fn finish(self, acc: &mut [f32], contributions: usize) {
        if self == ReduceOp::Average && contributions > 1 {
            let n = contributions as f32;
            acc.iter_mut().for_each(|a| *a /= n);
        }
    }
}

/// The collective a rank is entering.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    AllReduce { op: ReduceOp, len: usize },
    Broadcast { src: usize, len: usize },
    Rendezvous { tag: String },
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::AllReduce { op, len } => write!(f, "all_reduce({op:?}, len={len})"),
            OpKind::Broadcast { src, len } => write!(f, "broadcast(src={src}, len={len})"),
            OpKind::Rendezvous { tag } => write!(f, "rendezvous({tag:?})"),
        }
    }
}

/// Announces a collective call, every participant must send the exact same header.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct OpHeader {
    pub seq: u64,
    pub kind: OpKind,
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join { rank: usize, world_size: usize },
    Welcome { world_size: usize },
    Op(OpHeader),
    Disconnect,
}

/// The application layer message exchanged between the ranks of a group.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(&'a [f32]),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Short name of the variant, used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join { .. }) => "control/join",
            Msg::Control(Command::Welcome { .. }) => "control/welcome",
            Msg::Control(Command::Op(_)) => "control/op",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(_) => "data",
            Msg::Err(_) => "err",
        }
    }
}

fn invalid_data<T>(msg: String) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, msg))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(detail) => {
                buf.extend_from_slice(&KIND_ERR.to_be_bytes());
                Ok(Some(detail.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&KIND_CONTROL.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(nums) => {
                buf.extend_from_slice(&KIND_DATA.to_be_bytes());
                Ok(Some(bytemuck::cast_slice::<f32, u8>(nums)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return invalid_data(format!(
                "frame of {} bytes is shorter than the {HEADER_SIZE} bytes header",
                buf.len()
            ));
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);
        let rest: &'a [u8] = rest;

        match Header::from_be_bytes(kind) {
            KIND_ERR => match std::str::from_utf8(rest) {
                Ok(detail) => Ok(Msg::Err(Cow::Borrowed(detail))),
                Err(e) => invalid_data(format!("error frame is not utf-8: {e}")),
            },
            KIND_CONTROL => Ok(Msg::Control(serde_json::from_slice(rest)?)),
            KIND_DATA => match bytemuck::try_cast_slice::<u8, f32>(rest) {
                Ok(nums) => Ok(Msg::Data(nums)),
                Err(e) => invalid_data(format!("malformed tensor payload: {e}")),
            },
            other => invalid_data(format!("received an invalid kind header {other}")),
        }
    }
}
