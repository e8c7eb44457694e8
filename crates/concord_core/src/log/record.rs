//! Log record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{
    CoordinatorId, Decision, HeuristicOutcome, ParticipantRef, TerminationOutcome, TxState,
};

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"CTXL";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + state tag (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

const FLAG_READ_ONLY: u8 = 0b001;
const FLAG_CONFIRMED: u8 = 0b010;
const FLAG_REFUSED: u8 = 0b100;

const DECISION_NONE: u8 = 0;
const DECISION_COMMIT: u8 = 1;
const DECISION_ROLLBACK: u8 = 2;
const DECISION_ONE_PHASE_COMMIT: u8 = 3;

/// One enlisted participant as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantEntry {
    /// Durable participant reference.
    pub reference: ParticipantRef,
    /// Voted read-only; takes no part in phase two.
    pub read_only: bool,
    /// Confirmed the decision in phase two.
    pub confirmed: bool,
    /// Voted NO.
    pub refused: bool,
}

impl ParticipantEntry {
    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.read_only {
            flags |= FLAG_READ_ONLY;
        }
        if self.confirmed {
            flags |= FLAG_CONFIRMED;
        }
        if self.refused {
            flags |= FLAG_REFUSED;
        }
        flags
    }
}

/// State-specific part of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPayload {
    /// States without private data.
    Empty,
    /// In-doubt bookkeeping.
    InDoubt {
        /// Timeout ticks seen while in doubt.
        inquiries: u32,
        /// Whether the state was rebuilt from the log.
        recovered: bool,
        /// Whether replay was already requested from the superior.
        replay_requested: bool,
    },
    /// How the coordinator terminated.
    Terminated(TerminationOutcome),
}

/// The durable image of one coordinator state transition.
///
/// The latest record for a coordinator id is its durable state; earlier
/// ones are superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Coordinator the record belongs to.
    pub coordinator_id: CoordinatorId,
    /// State entered by the transition.
    pub state: TxState,
    /// Wall-clock time of the write, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// URI of the superior coordinator; `None` for a root.
    pub superior: Option<String>,
    /// Participants in enlistment order.
    pub participants: Vec<ParticipantEntry>,
    /// Final decision, once taken.
    pub decision: Option<Decision>,
    /// Whether the commit decision is a one-phase commit.
    pub one_phase: bool,
    /// Heuristic outcomes in enlistment order.
    pub heuristics: Vec<(ParticipantRef, HeuristicOutcome)>,
    /// State-specific data.
    pub payload: HandlerPayload,
}

impl LogRecord {
    /// Largest payload the 4-byte length field can describe.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Serializes the record payload (without envelope).
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut out = PayloadWriter::default();

        out.str(self.coordinator_id.as_str())?;
        out.u64(self.timestamp_ms);

        match &self.superior {
            Some(uri) => {
                out.u8(1);
                out.str(uri)?;
            }
            None => out.u8(0),
        }

        out.count(self.participants.len())?;
        for entry in &self.participants {
            out.str(entry.reference.as_str())?;
            out.u8(entry.flags());
        }

        out.u8(match (self.decision, self.one_phase) {
            (None, _) => DECISION_NONE,
            (Some(Decision::Commit), false) => DECISION_COMMIT,
            (Some(Decision::Commit), true) => DECISION_ONE_PHASE_COMMIT,
            (Some(Decision::Rollback), _) => DECISION_ROLLBACK,
        });

        out.count(self.heuristics.len())?;
        for (reference, outcome) in &self.heuristics {
            out.str(reference.as_str())?;
            out.u8(outcome.as_byte());
        }

        match self.payload {
            HandlerPayload::Empty => {}
            HandlerPayload::InDoubt {
                inquiries,
                recovered,
                replay_requested,
            } => {
                out.u32(inquiries);
                out.u8(u8::from(recovered));
                out.u8(u8::from(replay_requested));
            }
            HandlerPayload::Terminated(outcome) => out.u8(outcome.as_byte()),
        }

        if out.buf.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(CoreError::sys(format!(
                "log record for {} too large: {} bytes",
                self.coordinator_id,
                out.buf.len()
            )));
        }
        Ok(out.buf)
    }

    /// Deserializes a record from its state tag and payload.
    pub fn decode_payload(state: TxState, payload: &[u8]) -> CoreResult<Self> {
        let mut input = PayloadReader::new(payload);

        let coordinator_id = CoordinatorId::new(input.str()?);
        let timestamp_ms = input.u64()?;

        let superior = match input.u8()? {
            0 => None,
            1 => Some(input.str()?),
            other => {
                return Err(CoreError::log_corruption(format!(
                    "invalid superior flag {other} for {coordinator_id}"
                )))
            }
        };

        let count = input.u32()? as usize;
        let mut participants = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let reference = ParticipantRef::new(input.str()?);
            let flags = input.u8()?;
            if flags & !(FLAG_READ_ONLY | FLAG_CONFIRMED | FLAG_REFUSED) != 0 {
                return Err(CoreError::log_corruption(format!(
                    "unknown participant flags {flags:#04x} for {reference}"
                )));
            }
            participants.push(ParticipantEntry {
                reference,
                read_only: flags & FLAG_READ_ONLY != 0,
                confirmed: flags & FLAG_CONFIRMED != 0,
                refused: flags & FLAG_REFUSED != 0,
            });
        }

        let (decision, one_phase) = match input.u8()? {
            DECISION_NONE => (None, false),
            DECISION_COMMIT => (Some(Decision::Commit), false),
            DECISION_ROLLBACK => (Some(Decision::Rollback), false),
            DECISION_ONE_PHASE_COMMIT => (Some(Decision::Commit), true),
            other => {
                return Err(CoreError::log_corruption(format!(
                    "unknown decision tag {other} for {coordinator_id}"
                )))
            }
        };

        let count = input.u32()? as usize;
        let mut heuristics = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let reference = ParticipantRef::new(input.str()?);
            let tag = input.u8()?;
            let outcome = HeuristicOutcome::from_byte(tag).ok_or_else(|| {
                CoreError::log_corruption(format!("unknown heuristic tag {tag} for {reference}"))
            })?;
            heuristics.push((reference, outcome));
        }

        let payload = match state {
            TxState::InDoubt => HandlerPayload::InDoubt {
                inquiries: input.u32()?,
                recovered: input.bool()?,
                replay_requested: input.bool()?,
            },
            TxState::Terminated => {
                let tag = input.u8()?;
                let outcome = TerminationOutcome::from_byte(tag).ok_or_else(|| {
                    CoreError::log_corruption(format!("unknown termination tag {tag}"))
                })?;
                HandlerPayload::Terminated(outcome)
            }
            _ => HandlerPayload::Empty,
        };

        if input.remaining() != 0 {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in {state} record for {coordinator_id}: {} unread",
                input.remaining()
            )));
        }

        Ok(Self {
            coordinator_id,
            state,
            timestamp_ms,
            superior,
            participants,
            decision,
            one_phase,
            heuristics,
            payload,
        })
    }

    /// Frames the record: header, payload and CRC32 over both.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::sys("log record payload too large"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
        frame.push(self.state.as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

#[derive(Default)]
struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn count(&mut self, n: usize) -> CoreResult<()> {
        let n = u32::try_from(n).map_err(|_| CoreError::sys("too many entries in log record"))?;
        self.u32(n);
        Ok(())
    }

    fn str(&mut self, s: &str) -> CoreResult<()> {
        self.count(s.len())?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::log_corruption("unexpected end of payload"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> CoreResult<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CoreError::log_corruption(format!("invalid flag byte {other}"))),
        }
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn str(&mut self) -> CoreResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::log_corruption("string is not valid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reference: &str, read_only: bool, confirmed: bool) -> ParticipantEntry {
        ParticipantEntry {
            reference: ParticipantRef::new(reference),
            read_only,
            confirmed,
            refused: false,
        }
    }

    fn in_doubt_record() -> LogRecord {
        LogRecord {
            coordinator_id: CoordinatorId::new("tm:42"),
            state: TxState::InDoubt,
            timestamp_ms: 1_700_000_000_000,
            superior: Some("tcp://superior/tm:1".to_string()),
            participants: vec![entry("db://a", false, true), entry("mq://b", true, false)],
            decision: Some(Decision::Commit),
            one_phase: false,
            heuristics: vec![(ParticipantRef::new("db://a"), HeuristicOutcome::HeurHazard)],
            payload: HandlerPayload::InDoubt {
                inquiries: 7,
                recovered: true,
                replay_requested: false,
            },
        }
    }

    #[test]
    fn in_doubt_record_survives_encoding() {
        let record = in_doubt_record();
        let payload = record.encode_payload().unwrap();
        let decoded = LogRecord::decode_payload(TxState::InDoubt, &payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn one_phase_commit_and_termination_outcome_are_kept() {
        let record = LogRecord {
            coordinator_id: CoordinatorId::new("tm:1"),
            state: TxState::Terminated,
            timestamp_ms: 5,
            superior: None,
            participants: vec![entry("tm:1#0", false, true)],
            decision: Some(Decision::Commit),
            one_phase: true,
            heuristics: Vec::new(),
            payload: HandlerPayload::Terminated(TerminationOutcome::Committed),
        };
        let payload = record.encode_payload().unwrap();
        assert_eq!(
            LogRecord::decode_payload(TxState::Terminated, &payload).unwrap(),
            record
        );
    }

    #[test]
    fn in_doubt_payload_layout() {
        let mut record = in_doubt_record();
        record.heuristics.clear();
        let payload = record.encode_payload().unwrap();
        // inquiries (u32 LE), recovered, replay_requested close the payload
        let tail = &payload[payload.len() - 6..];
        assert_eq!(tail, &[7, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut payload = in_doubt_record().encode_payload().unwrap();
        payload.push(0);
        let result = LogRecord::decode_payload(TxState::InDoubt, &payload);
        assert!(matches!(result, Err(CoreError::LogCorruption { .. })));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let payload = in_doubt_record().encode_payload().unwrap();
        let result = LogRecord::decode_payload(TxState::InDoubt, &payload[..payload.len() - 3]);
        assert!(matches!(result, Err(CoreError::LogCorruption { .. })));
    }

    #[test]
    fn unknown_heuristic_tag_is_rejected() {
        let mut record = in_doubt_record();
        record.payload = HandlerPayload::Empty;
        record.state = TxState::HeurHazard;
        let mut payload = record.encode_payload().unwrap();
        let last = payload.len() - 1;
        payload[last] = 6;
        assert!(LogRecord::decode_payload(TxState::HeurHazard, &payload).is_err());
    }

    #[test]
    fn frame_layout() {
        let record = in_doubt_record();
        let frame = record.encode_frame().unwrap();
        let payload_len = record.encode_payload().unwrap().len();

        assert_eq!(&frame[0..4], &LOG_MAGIC);
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), LOG_VERSION);
        assert_eq!(frame[6], TxState::InDoubt.as_byte());
        assert_eq!(
            u32::from_le_bytes([frame[7], frame[8], frame[9], frame[10]]) as usize,
            payload_len
        );
        assert_eq!(frame.len(), HEADER_SIZE + payload_len + CRC_SIZE);

        let crc_start = frame.len() - CRC_SIZE;
        let stored = u32::from_le_bytes(frame[crc_start..].try_into().unwrap());
        assert_eq!(stored, crc32fast::hash(&frame[..crc_start]));
    }
}
