//! Structured operation-log records.

use serde::Serialize;

use crate::cache::ClientId;

/// Code recorded when a client is parked on a pending-lock queue.
pub const WAIT_CODE: i32 = -2;

/// The operation a log record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operation {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSE")]
    Close,
    #[serde(rename = "READ")]
    Read,
    #[serde(rename = "READ_N")]
    ReadN,
    #[serde(rename = "WRITE")]
    Write,
    #[serde(rename = "APPEND")]
    Append,
    #[serde(rename = "LOCK")]
    Lock,
    #[serde(rename = "UNLOCK")]
    Unlock,
    #[serde(rename = "REMOVE")]
    Remove,
    #[serde(rename = "NEW_CLIENT")]
    NewClient,
    #[serde(rename = "CLIENT_LEFT")]
    ClientLeft,
}

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// The operation succeeded after processing `bytes` payload bytes.
    Success { bytes: u64 },
    /// The operation failed with the given protocol error code.
    Failure { code: i32 },
    /// The client was parked waiting for a lock.
    Wait { code: i32 },
}

/// One entry of the JSON operation log.
///
/// Field names and shapes are part of the log-file format and must not
/// drift: `bytesProcessed` appears only on success, `errorCode` only on
/// failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    timestamp: String,
    client_fd: ClientId,
    worker_tid: u64,
    operation_type: Operation,
    file_path: String,
    outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes_processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<i32>,
}

impl LogRecord {
    /// Build a record stamped with the current local time and the calling
    /// thread's worker identity.
    pub fn new(op: Operation, path: &[u8], client: ClientId, outcome: LogOutcome) -> Self {
        let (outcome_text, bytes_processed, error_code) = match outcome {
            LogOutcome::Success { bytes } => ("OK".to_string(), Some(bytes), None),
            LogOutcome::Failure { code } => ("failed".to_string(), None, Some(code)),
            LogOutcome::Wait { code } => {
                (format!("client put on wait (code {code})"), None, None)
            }
        };
        Self {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            client_fd: client,
            worker_tid: super::worker_id(),
            operation_type: op,
            file_path: String::from_utf8_lossy(path).into_owned(),
            outcome: outcome_text,
            bytes_processed,
            error_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_records_carry_bytes_processed() {
        let record = LogRecord::new(
            Operation::Write,
            b"/data/a.txt",
            7,
            LogOutcome::Success { bytes: 42 },
        );
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["operationType"], "WRITE");
        assert_eq!(json["clientFd"], 7);
        assert_eq!(json["filePath"], "/data/a.txt");
        assert_eq!(json["outcome"], "OK");
        assert_eq!(json["bytesProcessed"], 42);
        assert!(json.get("errorCode").is_none());
    }

    #[test]
    fn failure_records_carry_the_error_code() {
        let record = LogRecord::new(
            Operation::Read,
            b"/gone",
            3,
            LogOutcome::Failure { code: 2 },
        );
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["errorCode"], 2);
        assert!(json.get("bytesProcessed").is_none());
    }

    #[test]
    fn wait_records_spell_out_the_code() {
        let record = LogRecord::new(Operation::Lock, b"/f", 9, LogOutcome::Wait { code: WAIT_CODE });
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"], "client put on wait (code -2)");
    }

    #[test]
    fn timestamps_look_like_wall_clock_times() {
        let record = LogRecord::new(Operation::Open, b"/f", 1, LogOutcome::Success { bytes: 0 });
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        let stamp = json["timestamp"].as_str().unwrap();
        assert_eq!(stamp.len(), 8);
        assert_eq!(stamp.as_bytes()[2], b':');
        assert_eq!(stamp.as_bytes()[5], b':');
    }
}
