//! Plugin wire protocol
//!
//! Both directions use the same framing: an 8-byte little-endian length
//! followed by that many bytes of UTF-8 JSON. A frame length below 2 is a
//! protocol error.

use crate::error::{SwiftpackError, SwiftpackResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Messages sent from the host to the plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HostToPluginMessage {
    /// Ask the plugin to perform its action over the given input
    PerformAction { input: serde_json::Value },
    BuildOperationResponse { result: BuildResult },
    TestOperationResponse { result: TestResult },
    SymbolGraphResponse { result: SymbolGraphResult },
    ErrorResponse { error: String },
}

/// Messages sent from the plugin to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PluginToHostMessage {
    #[serde(rename_all = "camelCase")]
    EmitDiagnostic {
        severity: DiagnosticSeverity,
        message: String,
        #[serde(default)]
        file: Option<PathBuf>,
        #[serde(default)]
        line: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    DefineBuildCommand {
        configuration: CommandConfiguration,
        input_files: Vec<PathBuf>,
        output_files: Vec<PathBuf>,
    },
    #[serde(rename_all = "camelCase")]
    DefinePrebuildCommand {
        configuration: CommandConfiguration,
        output_files_directory: PathBuf,
    },
    #[serde(rename_all = "camelCase")]
    BuildOperationRequest {
        subset: BuildSubset,
        parameters: BuildParameters,
    },
    #[serde(rename_all = "camelCase")]
    TestOperationRequest {
        subset: TestSubset,
        parameters: TestParameters,
    },
    #[serde(rename_all = "camelCase")]
    SymbolGraphRequest {
        target_name: String,
        options: SymbolGraphOptions,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Remark,
}

/// Invocation description of a defined build/prebuild command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfiguration {
    #[serde(default)]
    pub display_name: Option<String>,
    pub executable: PathBuf,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildSubset {
    #[serde(rename_all = "camelCase")]
    All { including_tests: bool },
    Product(String),
    Target(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildConfiguration {
    Debug,
    Release,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildParameters {
    pub configuration: BuildConfiguration,
    #[serde(default)]
    pub echo_logs: bool,
    #[serde(default)]
    pub other_flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Executable,
    DynamicLibrary,
    StaticLibrary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub succeeded: bool,
    #[serde(default)]
    pub log_text: String,
    #[serde(default)]
    pub built_artifacts: Vec<BuiltArtifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestSubset {
    All,
    Filtered(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestParameters {
    #[serde(default)]
    pub enable_code_coverage: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub succeeded: bool,
    #[serde(default)]
    pub code_coverage_data_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Private,
    Fileprivate,
    Internal,
    Public,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolGraphOptions {
    pub minimum_access_level: AccessLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolGraphResult {
    pub directory_path: PathBuf,
}

/// Write one framed message
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> SwiftpackResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    let header = (payload.len() as u64).to_le_bytes();
    writer
        .write_all(&header)
        .await
        .map_err(|e| SwiftpackError::io("writing plugin message header", e))?;
    writer
        .write_all(&payload)
        .await
        .map_err(|e| SwiftpackError::io("writing plugin message payload", e))?;
    writer
        .flush()
        .await
        .map_err(|e| SwiftpackError::io("flushing plugin message", e))
}

/// Read one framed message; `Ok(None)` signals a clean end of stream
pub async fn read_message<R, T>(reader: &mut R) -> SwiftpackResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader
            .read(&mut header[filled..])
            .await
            .map_err(|e| SwiftpackError::io("reading plugin message header", e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(SwiftpackError::PluginTruncatedHeader { got: filled });
        }
        filled += n;
    }

    let expected = u64::from_le_bytes(header);
    if expected < 2 {
        return Err(SwiftpackError::PluginInvalidPayloadSize(expected));
    }

    let mut payload = vec![0u8; expected as usize];
    let mut filled = 0;
    while filled < payload.len() {
        let n = reader
            .read(&mut payload[filled..])
            .await
            .map_err(|e| SwiftpackError::io("reading plugin message payload", e))?;
        if n == 0 {
            return Err(SwiftpackError::PluginTruncatedPayload {
                expected,
                got: filled,
            });
        }
        filled += n;
    }

    let message = serde_json::from_slice(&payload)
        .map_err(|e| SwiftpackError::PluginInvalidMessage(e.to_string()))?;
    Ok(Some(message))
}

/// Encode one framed message to a byte buffer
pub fn encode_message<T: Serialize>(message: &T) -> SwiftpackResult<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let message = PluginToHostMessage::EmitDiagnostic {
            severity: DiagnosticSeverity::Warning,
            message: "shadowed variable".to_string(),
            file: Some(PathBuf::from("Sources/main.swift")),
            line: Some(42),
        };
        write_message(&mut a, &message).await.unwrap();
        drop(a);

        let decoded: PluginToHostMessage = read_message(&mut b).await.unwrap().unwrap();
        assert_eq!(decoded, message);
        assert!(read_message::<_, PluginToHostMessage>(&mut b)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn both_directions_share_framing() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let message = HostToPluginMessage::PerformAction {
            input: serde_json::json!({ "action": "createBuildToolCommands" }),
        };
        write_message(&mut a, &message).await.unwrap();

        let decoded: HostToPluginMessage = read_message(&mut b).await.unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn header_below_two_is_invalid_payload_size() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&1u64.to_le_bytes()).await.unwrap();
        a.write_all(b"x").await.unwrap();
        drop(a);

        let err = read_message::<_, PluginToHostMessage>(&mut b)
            .await
            .unwrap_err();
        assert!(matches!(err, SwiftpackError::PluginInvalidPayloadSize(1)));
    }

    #[tokio::test]
    async fn truncated_header_is_reported() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0u8; 3]).await.unwrap();
        drop(a);

        let err = read_message::<_, PluginToHostMessage>(&mut b)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SwiftpackError::PluginTruncatedHeader { got: 3 }
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_reported() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u64.to_le_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);

        let err = read_message::<_, PluginToHostMessage>(&mut b)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SwiftpackError::PluginTruncatedPayload {
                expected: 10,
                got: 3
            }
        ));
    }

    #[tokio::test]
    async fn garbage_payload_is_a_malformed_message() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&2u64.to_le_bytes()).await.unwrap();
        a.write_all(b"!!").await.unwrap();
        drop(a);

        let err = read_message::<_, PluginToHostMessage>(&mut b)
            .await
            .unwrap_err();
        assert!(matches!(err, SwiftpackError::PluginInvalidMessage(_)));
    }

    #[test]
    fn message_wire_names_are_stable() {
        let message = PluginToHostMessage::DefineBuildCommand {
            configuration: CommandConfiguration {
                display_name: Some("Generate".to_string()),
                executable: PathBuf::from("/usr/bin/gen"),
                arguments: vec!["--fast".to_string()],
                environment: BTreeMap::new(),
                working_directory: None,
            },
            input_files: vec![PathBuf::from("in.txt")],
            output_files: vec![PathBuf::from("out.txt")],
        };
        let json = serde_json::to_value(&message).unwrap();
        let body = &json["defineBuildCommand"];
        assert_eq!(body["configuration"]["displayName"], "Generate");
        assert_eq!(body["inputFiles"][0], "in.txt");
        assert_eq!(body["outputFiles"][0], "out.txt");
    }
}
