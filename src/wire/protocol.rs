//! The message kinds the core uses (§4.1) and their wire-tag constants.
//!
//! Tags and response-code constants are part of the compatibility surface
//! (§6): the reference implementation calls these `ASN.1_TYPE_*` and
//! `MESSAGE_RESPONSE_*`. Names here are idiomatic Rust but the numeric
//! values are the stable wire contract — never renumber a tag once shipped.

use std::io;

use bytes::{Buf, BufMut, BytesMut};

use super::tlv;
use crate::types::param::ParameterBag;

/// Top-level TLV body tags (the reference's `ASN.1_TYPE_*` constants).
pub mod tag {
    pub const HELLO_REQUEST: u8 = 0x01;
    pub const HELLO_RESPONSE: u8 = 0x02;
    pub const HELLO_MONITOR_REQUEST: u8 = 0x03;
    pub const HELLO_MONITOR_RESPONSE: u8 = 0x04;
    pub const KEEP_ALIVE: u8 = 0x05;
    pub const CLASS_TRANSFER_REQUEST: u8 = 0x06;
    pub const CLASS_TRANSFER_RESPONSE: u8 = 0x07;
    pub const JOB_REQUEST: u8 = 0x08;
    pub const JOB_RESPONSE: u8 = 0x09;
    pub const JOB_CONTROL_REQUEST: u8 = 0x0a;
    pub const JOB_CONTROL_RESPONSE: u8 = 0x0b;
    pub const STATUS_REQUEST: u8 = 0x0c;
    pub const STATUS_RESPONSE: u8 = 0x0d;
    pub const REAL_TIME_STATISTICS: u8 = 0x0e;
    pub const SHUTDOWN: u8 = 0x0f;
    pub const SERVER_SHUTDOWN: u8 = 0x10;
    pub const REGISTER_STATISTIC: u8 = 0x11;
    pub const MONITOR_REQUEST: u8 = 0x12;
    pub const MONITOR_RESPONSE: u8 = 0x13;
}

/// `MESSAGE_RESPONSE_*`: the outcome of dispatching a job to one client
/// (§4.1 JobResponse, §7 "Job rejection" / "Job execution failure").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum JobResponseCode {
    Accepted = 0,
    RejectedNoSuchClass = 1,
    RejectedBusy = 2,
    RejectedOther = 3,
    JobAborted = 4,
    JobCompletedSuccessfully = 5,
    JobCompletedWithErrors = 6,
    JobStoppedByOperator = 7,
    JobStoppedStopTimeReached = 8,
    JobStoppedDurationReached = 9,
}

impl JobResponseCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Accepted,
            1 => Self::RejectedNoSuchClass,
            2 => Self::RejectedBusy,
            3 => Self::RejectedOther,
            4 => Self::JobAborted,
            5 => Self::JobCompletedSuccessfully,
            6 => Self::JobCompletedWithErrors,
            7 => Self::JobStoppedByOperator,
            8 => Self::JobStoppedStopTimeReached,
            9 => Self::JobStoppedDurationReached,
            _ => return None,
        })
    }

    pub fn is_acceptance(self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn is_rejection(self) -> bool {
        matches!(self, Self::RejectedNoSuchClass | Self::RejectedBusy | Self::RejectedOther)
    }
}

/// Outcome of a Hello/HelloMonitor handshake (§4.2).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HelloResultCode {
    Success = 0,
    BadCredentials = 1,
    RestrictedModeDenied = 2,
    VersionMismatch = 3,
    Other = 4,
}

impl HelloResultCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Success,
            1 => Self::BadCredentials,
            2 => Self::RestrictedModeDenied,
            3 => Self::VersionMismatch,
            4 => Self::Other,
            _ => return None,
        })
    }
}

/// start/stop/abort/disable (§4.1 JobControlRequest).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum JobControlOp {
    Start = 0,
    Stop = 1,
    Abort = 2,
    Disable = 3,
}

impl JobControlOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Start,
            1 => Self::Stop,
            2 => Self::Abort,
            3 => Self::Disable,
            _ => return None,
        })
    }
}

/// A message body: the tagged union selected by the top-level frame tag
/// (Design Note §9: "replace the `Message` base + subclass hierarchy with a
/// single tagged sum").
#[derive(Clone, Debug, PartialEq)]
pub enum MessageBody {
    HelloRequest {
        auth_id: String,
        auth_credential: Option<String>,
        client_id: String,
        client_version: String,
    },
    HelloResponse {
        result: HelloResultCode,
        reason: Option<String>,
    },
    HelloMonitorRequest {
        client_id: String,
    },
    HelloMonitorResponse {
        result: HelloResultCode,
        reason: Option<String>,
    },
    KeepAlive,
    ClassTransferRequest {
        class_name: String,
    },
    ClassTransferResponse {
        found: bool,
        payload: Vec<u8>,
    },
    JobRequest {
        job_id: String,
        class_name: String,
        start_time_epoch_secs: i64,
        stop_time_epoch_secs: Option<i64>,
        duration_secs: Option<u32>,
        client_number: u32,
        threads: u32,
        thread_startup_delay_secs: u32,
        collection_interval_secs: u32,
        warmup_secs: u32,
        cooldown_secs: u32,
        parameters: ParameterBag,
        stat_persistence_interval_secs: u32,
    },
    JobResponse {
        job_id: String,
        code: JobResponseCode,
        message: Option<String>,
        /// canonically-serialized statistics payload (opaque to the codec;
        /// the scheduler deserializes it once aggregation needs it).
        statistics: Option<Vec<u8>>,
    },
    JobControlRequest {
        job_id: String,
        op: JobControlOp,
    },
    JobControlResponse {
        job_id: String,
        accepted: bool,
        reason: Option<String>,
    },
    StatusRequest,
    StatusResponse {
        available: bool,
        current_job_id: Option<String>,
        load: f64,
    },
    RealTimeStatistics {
        job_id: String,
        interval_index: u32,
        payload: Vec<u8>,
    },
    Shutdown,
    ServerShutdown,
    RegisterStatistic {
        name: String,
        collection_interval_secs: u32,
    },
    MonitorRequest {
        job_id: String,
        start: bool,
    },
    MonitorResponse {
        job_id: String,
        accepted: bool,
    },
}

impl MessageBody {
    pub fn tag(&self) -> u8 {
        use tag::*;
        match self {
            Self::HelloRequest { .. } => HELLO_REQUEST,
            Self::HelloResponse { .. } => HELLO_RESPONSE,
            Self::HelloMonitorRequest { .. } => HELLO_MONITOR_REQUEST,
            Self::HelloMonitorResponse { .. } => HELLO_MONITOR_RESPONSE,
            Self::KeepAlive => KEEP_ALIVE,
            Self::ClassTransferRequest { .. } => CLASS_TRANSFER_REQUEST,
            Self::ClassTransferResponse { .. } => CLASS_TRANSFER_RESPONSE,
            Self::JobRequest { .. } => JOB_REQUEST,
            Self::JobResponse { .. } => JOB_RESPONSE,
            Self::JobControlRequest { .. } => JOB_CONTROL_REQUEST,
            Self::JobControlResponse { .. } => JOB_CONTROL_RESPONSE,
            Self::StatusRequest => STATUS_REQUEST,
            Self::StatusResponse { .. } => STATUS_RESPONSE,
            Self::RealTimeStatistics { .. } => REAL_TIME_STATISTICS,
            Self::Shutdown => SHUTDOWN,
            Self::ServerShutdown => SERVER_SHUTDOWN,
            Self::RegisterStatistic { .. } => REGISTER_STATISTIC,
            Self::MonitorRequest { .. } => MONITOR_REQUEST,
            Self::MonitorResponse { .. } => MONITOR_RESPONSE,
        }
    }
}

/// The common envelope every frame carries (§3 Message entity, §4.1).
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub message_id: i64,
    pub body: MessageBody,
}

impl Envelope {
    pub fn new(message_id: i64, body: MessageBody) -> Self {
        Self { message_id, body }
    }

    /// Encodes the envelope's body tag, message id, and fields (but not the
    /// outer frame-length prefix, which [`super::codec::Codec`] owns).
    pub(super) fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_u8(self.body.tag());
        tlv::put_integer(dst, self.message_id);
        self.body.encode_fields(dst);
    }

    pub(super) fn decode_from(src: &mut impl Buf) -> io::Result<Self> {
        if !src.has_remaining() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty frame"));
        }
        let body_tag = src.get_u8();
        let message_id = tlv::get_integer(src)?;
        let body = MessageBody::decode_fields(body_tag, src)?;
        Ok(Self { message_id, body })
    }
}

fn unknown_tag(tag: u8) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("unknown message tag {tag:#04x}"))
}

fn bad_code(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("invalid {what} code"))
}

fn encode_param_bag(dst: &mut BytesMut, bag: &ParameterBag) {
    // Parameters are serialized through their single canonical form (YAML,
    // matching the teacher crate's use of `serde_yaml` for its own
    // canonical stats representation) and carried as an opaque string field.
    let yaml = serde_yaml::to_string(bag).expect("parameter bag is always serializable");
    tlv::put_string(dst, &yaml);
}

fn decode_param_bag(src: &mut impl Buf) -> io::Result<ParameterBag> {
    let yaml = tlv::get_string(src)?;
    serde_yaml::from_str(&yaml)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad parameter bag: {e}")))
}

impl MessageBody {
    fn encode_fields(&self, dst: &mut BytesMut) {
        match self {
            Self::HelloRequest { auth_id, auth_credential, client_id, client_version } => {
                tlv::put_string(dst, auth_id);
                tlv::put_opt_string(dst, auth_credential);
                tlv::put_string(dst, client_id);
                tlv::put_string(dst, client_version);
            },
            Self::HelloResponse { result, reason } => {
                dst.put_u8(*result as u8);
                tlv::put_opt_string(dst, reason);
            },
            Self::HelloMonitorRequest { client_id } => {
                tlv::put_string(dst, client_id);
            },
            Self::HelloMonitorResponse { result, reason } => {
                dst.put_u8(*result as u8);
                tlv::put_opt_string(dst, reason);
            },
            Self::KeepAlive => {},
            Self::ClassTransferRequest { class_name } => {
                tlv::put_string(dst, class_name);
            },
            Self::ClassTransferResponse { found, payload } => {
                tlv::put_bool(dst, *found);
                tlv::put_bytes(dst, payload);
            },
            Self::JobRequest {
                job_id,
                class_name,
                start_time_epoch_secs,
                stop_time_epoch_secs,
                duration_secs,
                client_number,
                threads,
                thread_startup_delay_secs,
                collection_interval_secs,
                warmup_secs,
                cooldown_secs,
                parameters,
                stat_persistence_interval_secs,
            } => {
                tlv::put_string(dst, job_id);
                tlv::put_string(dst, class_name);
                tlv::put_integer(dst, *start_time_epoch_secs);
                tlv::put_opt_integer(dst, stop_time_epoch_secs);
                tlv::put_opt_integer(dst, &duration_secs.map(i64::from));
                tlv::put_integer(dst, i64::from(*client_number));
                tlv::put_integer(dst, i64::from(*threads));
                tlv::put_integer(dst, i64::from(*thread_startup_delay_secs));
                tlv::put_integer(dst, i64::from(*collection_interval_secs));
                tlv::put_integer(dst, i64::from(*warmup_secs));
                tlv::put_integer(dst, i64::from(*cooldown_secs));
                encode_param_bag(dst, parameters);
                tlv::put_integer(dst, i64::from(*stat_persistence_interval_secs));
            },
            Self::JobResponse { job_id, code, message, statistics } => {
                tlv::put_string(dst, job_id);
                dst.put_u8(*code as u8);
                tlv::put_opt_string(dst, message);
                match statistics {
                    Some(bytes) => {
                        tlv::put_bool(dst, true);
                        tlv::put_bytes(dst, bytes);
                    },
                    None => tlv::put_bool(dst, false),
                }
            },
            Self::JobControlRequest { job_id, op } => {
                tlv::put_string(dst, job_id);
                dst.put_u8(*op as u8);
            },
            Self::JobControlResponse { job_id, accepted, reason } => {
                tlv::put_string(dst, job_id);
                tlv::put_bool(dst, *accepted);
                tlv::put_opt_string(dst, reason);
            },
            Self::StatusRequest => {},
            Self::StatusResponse { available, current_job_id, load } => {
                tlv::put_bool(dst, *available);
                tlv::put_opt_string(dst, current_job_id);
                tlv::put_string(dst, &load.to_string());
            },
            Self::RealTimeStatistics { job_id, interval_index, payload } => {
                tlv::put_string(dst, job_id);
                tlv::put_integer(dst, i64::from(*interval_index));
                tlv::put_bytes(dst, payload);
            },
            Self::Shutdown => {},
            Self::ServerShutdown => {},
            Self::RegisterStatistic { name, collection_interval_secs } => {
                tlv::put_string(dst, name);
                tlv::put_integer(dst, i64::from(*collection_interval_secs));
            },
            Self::MonitorRequest { job_id, start } => {
                tlv::put_string(dst, job_id);
                tlv::put_bool(dst, *start);
            },
            Self::MonitorResponse { job_id, accepted } => {
                tlv::put_string(dst, job_id);
                tlv::put_bool(dst, *accepted);
            },
        }
    }

    fn decode_fields(body_tag: u8, src: &mut impl Buf) -> io::Result<Self> {
        Ok(match body_tag {
            tag::HELLO_REQUEST => Self::HelloRequest {
                auth_id: tlv::get_string(src)?,
                auth_credential: tlv::get_opt_string(src)?,
                client_id: tlv::get_string(src)?,
                client_version: tlv::get_string(src)?,
            },
            tag::HELLO_RESPONSE => Self::HelloResponse {
                result: HelloResultCode::from_u8(get_u8(src)?).ok_or_else(|| bad_code("hello result"))?,
                reason: tlv::get_opt_string(src)?,
            },
            tag::HELLO_MONITOR_REQUEST => Self::HelloMonitorRequest { client_id: tlv::get_string(src)? },
            tag::HELLO_MONITOR_RESPONSE => Self::HelloMonitorResponse {
                result: HelloResultCode::from_u8(get_u8(src)?).ok_or_else(|| bad_code("hello result"))?,
                reason: tlv::get_opt_string(src)?,
            },
            tag::KEEP_ALIVE => Self::KeepAlive,
            tag::CLASS_TRANSFER_REQUEST => {
                Self::ClassTransferRequest { class_name: tlv::get_string(src)? }
            },
            tag::CLASS_TRANSFER_RESPONSE => Self::ClassTransferResponse {
                found: tlv::get_bool(src)?,
                payload: tlv::get_bytes(src)?,
            },
            tag::JOB_REQUEST => Self::JobRequest {
                job_id: tlv::get_string(src)?,
                class_name: tlv::get_string(src)?,
                start_time_epoch_secs: tlv::get_integer(src)?,
                stop_time_epoch_secs: tlv::get_opt_integer(src)?,
                duration_secs: tlv::get_opt_integer(src)?.map(|v| v as u32),
                client_number: tlv::get_integer(src)? as u32,
                threads: tlv::get_integer(src)? as u32,
                thread_startup_delay_secs: tlv::get_integer(src)? as u32,
                collection_interval_secs: tlv::get_integer(src)? as u32,
                warmup_secs: tlv::get_integer(src)? as u32,
                cooldown_secs: tlv::get_integer(src)? as u32,
                parameters: decode_param_bag(src)?,
                stat_persistence_interval_secs: tlv::get_integer(src)? as u32,
            },
            tag::JOB_RESPONSE => {
                let job_id = tlv::get_string(src)?;
                let code =
                    JobResponseCode::from_u8(get_u8(src)?).ok_or_else(|| bad_code("job response"))?;
                let message = tlv::get_opt_string(src)?;
                let has_stats = tlv::get_bool(src)?;
                let statistics = if has_stats { Some(tlv::get_bytes(src)?) } else { None };
                Self::JobResponse { job_id, code, message, statistics }
            },
            tag::JOB_CONTROL_REQUEST => Self::JobControlRequest {
                job_id: tlv::get_string(src)?,
                op: JobControlOp::from_u8(get_u8(src)?).ok_or_else(|| bad_code("job control op"))?,
            },
            tag::JOB_CONTROL_RESPONSE => Self::JobControlResponse {
                job_id: tlv::get_string(src)?,
                accepted: tlv::get_bool(src)?,
                reason: tlv::get_opt_string(src)?,
            },
            tag::STATUS_REQUEST => Self::StatusRequest,
            tag::STATUS_RESPONSE => Self::StatusResponse {
                available: tlv::get_bool(src)?,
                current_job_id: tlv::get_opt_string(src)?,
                load: tlv::get_string(src)?
                    .parse()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad load value"))?,
            },
            tag::REAL_TIME_STATISTICS => Self::RealTimeStatistics {
                job_id: tlv::get_string(src)?,
                interval_index: tlv::get_integer(src)? as u32,
                payload: tlv::get_bytes(src)?,
            },
            tag::SHUTDOWN => Self::Shutdown,
            tag::SERVER_SHUTDOWN => Self::ServerShutdown,
            tag::REGISTER_STATISTIC => Self::RegisterStatistic {
                name: tlv::get_string(src)?,
                collection_interval_secs: tlv::get_integer(src)? as u32,
            },
            tag::MONITOR_REQUEST => {
                Self::MonitorRequest { job_id: tlv::get_string(src)?, start: tlv::get_bool(src)? }
            },
            tag::MONITOR_RESPONSE => {
                Self::MonitorResponse { job_id: tlv::get_string(src)?, accepted: tlv::get_bool(src)? }
            },
            other => return Err(unknown_tag(other)),
        })
    }
}

fn get_u8(src: &mut impl Buf) -> io::Result<u8> {
    if !src.has_remaining() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated field"));
    }
    Ok(src.get_u8())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(body: MessageBody) {
        let env = Envelope::new(42, body.clone());
        let mut buf = BytesMut::new();
        env.encode_into(&mut buf);
        let mut reader = &buf[..];
        let decoded = Envelope::decode_from(&mut reader).unwrap();
        assert_eq!(decoded, env);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn every_message_kind_round_trips() {
        roundtrip(MessageBody::HelloRequest {
            auth_id: "alice".into(),
            auth_credential: Some("secret".into()),
            client_id: "c1".into(),
            client_version: "1.0".into(),
        });
        roundtrip(MessageBody::HelloResponse { result: HelloResultCode::Success, reason: None });
        roundtrip(MessageBody::HelloMonitorRequest { client_id: "m1".into() });
        roundtrip(MessageBody::HelloMonitorResponse {
            result: HelloResultCode::BadCredentials,
            reason: Some("nope".into()),
        });
        roundtrip(MessageBody::KeepAlive);
        roundtrip(MessageBody::ClassTransferRequest { class_name: "http".into() });
        roundtrip(MessageBody::ClassTransferResponse { found: true, payload: vec![1, 2, 3] });
        roundtrip(MessageBody::JobRequest {
            job_id: "job-1".into(),
            class_name: "null".into(),
            start_time_epoch_secs: 1_700_000_000,
            stop_time_epoch_secs: Some(1_700_000_060),
            duration_secs: Some(60),
            client_number: 0,
            threads: 4,
            thread_startup_delay_secs: 0,
            collection_interval_secs: 10,
            warmup_secs: 5,
            cooldown_secs: 5,
            parameters: ParameterBag::new(),
            stat_persistence_interval_secs: 10,
        });
        roundtrip(MessageBody::JobResponse {
            job_id: "job-1".into(),
            code: JobResponseCode::JobCompletedSuccessfully,
            message: None,
            statistics: Some(vec![9, 9, 9]),
        });
        roundtrip(MessageBody::JobControlRequest { job_id: "job-1".into(), op: JobControlOp::Stop });
        roundtrip(MessageBody::JobControlResponse {
            job_id: "job-1".into(),
            accepted: true,
            reason: None,
        });
        roundtrip(MessageBody::StatusRequest);
        roundtrip(MessageBody::StatusResponse {
            available: true,
            current_job_id: Some("job-1".into()),
            load: 0.5,
        });
        roundtrip(MessageBody::RealTimeStatistics {
            job_id: "job-1".into(),
            interval_index: 3,
            payload: vec![1, 2],
        });
        roundtrip(MessageBody::Shutdown);
        roundtrip(MessageBody::ServerShutdown);
        roundtrip(MessageBody::RegisterStatistic {
            name: "cpu".into(),
            collection_interval_secs: 10,
        });
        roundtrip(MessageBody::MonitorRequest { job_id: "job-1".into(), start: true });
        roundtrip(MessageBody::MonitorResponse { job_id: "job-1".into(), accepted: true });
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x7f);
        tlv::put_integer(&mut buf, 1);
        let mut reader = &buf[..];
        assert!(Envelope::decode_from(&mut reader).is_err());
    }
}
