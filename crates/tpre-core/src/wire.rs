//! Wire codec: JSON schemas for everything that crosses a topic or is
//! persisted to disk.
//!
//! Field names are part of the protocol. DKG messages use capitalized
//! field names (`Index`, `Commitments`, `SessionID`); the re-encryption
//! request/share schemas and the stored secret envelope use snake_case with
//! optional fields, where omission is distinct from a present-but-empty
//! value. All byte fields are base64 strings carrying the canonical
//! group-element or scalar encoding.
//!
//! Typed protocol structs never derive serde; conversion goes through the
//! `*Json` forms here, and every group element is validated on decode.

use k256::ecdsa::Signature;
use serde::{Deserialize, Serialize};

use crate::{
    dkg::{Deal, Justification, Ready, Response, ResponseStatus, SecretCommits},
    group,
    reencrypt::{ReencryptRequest, ReencryptedShare, SecretEnvelope},
    types::{DistKeyShare, ParticipantIndex, PriShare, SessionId},
    Error, Result,
};

/// `deal` topic payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealJson {
    pub dealer_index: u32,
    pub target_index: u32,
    #[serde(with = "b64")]
    pub encrypted_share: Vec<u8>,
    #[serde(with = "b64_list")]
    pub commitments: Vec<Vec<u8>>,
    #[serde(rename = "SessionID", with = "b64")]
    pub session_id: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// One verifier verdict inside a [`ResponseEnvelope`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseJson {
    #[serde(rename = "SessionID", with = "b64")]
    pub session_id: Vec<u8>,
    pub dealer_index: u32,
    pub index: u32,
    pub approved: bool,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// A dealer's complaint answer inside a [`ResponseEnvelope`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JustificationJson {
    #[serde(rename = "SessionID", with = "b64")]
    pub session_id: Vec<u8>,
    pub dealer_index: u32,
    pub target_index: u32,
    #[serde(with = "b64")]
    pub share: Vec<u8>,
    #[serde(with = "b64")]
    pub blinding: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// `response` topic payload: verdicts and justifications share the topic,
/// distinguished by an external tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseEnvelope {
    Response(ResponseJson),
    Justification(JustificationJson),
}

/// Decoded `response` topic message
#[derive(Debug, Clone)]
pub enum ResponseMessage {
    Response(Response),
    Justification(Justification),
}

/// `ready` topic payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadyJson {
    pub index: u32,
    #[serde(with = "b64")]
    pub context: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// `secret_commits` topic payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretCommitJson {
    pub index: u32,
    #[serde(with = "b64_list")]
    pub commitments: Vec<Vec<u8>>,
    #[serde(rename = "SessionID", with = "b64")]
    pub session_id: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// Persisted form of a finalized key share
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistKeyShareJson {
    pub pri_share: PriShareJson,
    #[serde(with = "b64_list")]
    pub commits: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PriShareJson {
    pub i: i64,
    #[serde(with = "b64")]
    pub v: Vec<u8>,
}

/// Stored ciphertext envelope: the encryption commitment point plus the
/// AEAD-encrypted chunks of the secret
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretJson {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub enc_cmt: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_list_opt")]
    pub enc_scrt: Option<Vec<Vec<u8>>>,
}

/// A reader's request for re-encryption of one stored secret
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReencryptSecretRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub rdr_pk: Option<Vec<u8>>,
}

/// One node's re-encrypted share with its proof, answering a request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReencryptedSecretShare {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub rdr_pk: Option<Vec<u8>>,
    #[serde(default)]
    pub index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub xnc_ski: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub chlgi: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub proofi: Option<Vec<u8>>,
}

// Topic payload encode/decode entry points. Encoding is infallible up to
// serde; decoding validates every group element and signature.

pub fn encode_deal(deal: &Deal) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&DealJson::from(deal))?)
}

pub fn decode_deal(bytes: &[u8]) -> Result<Deal> {
    let json: DealJson = serde_json::from_slice(bytes)?;
    Deal::try_from(&json)
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ResponseEnvelope::Response(
        ResponseJson::from(response),
    ))?)
}

pub fn encode_justification(justification: &Justification) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ResponseEnvelope::Justification(
        JustificationJson::from(justification),
    ))?)
}

pub fn decode_response_message(bytes: &[u8]) -> Result<ResponseMessage> {
    let envelope: ResponseEnvelope = serde_json::from_slice(bytes)?;
    Ok(match envelope {
        ResponseEnvelope::Response(json) => ResponseMessage::Response(Response::try_from(&json)?),
        ResponseEnvelope::Justification(json) => {
            ResponseMessage::Justification(Justification::try_from(&json)?)
        }
    })
}

pub fn encode_ready(ready: &Ready) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ReadyJson::from(ready))?)
}

pub fn decode_ready(bytes: &[u8]) -> Result<Ready> {
    let json: ReadyJson = serde_json::from_slice(bytes)?;
    Ready::try_from(&json)
}

pub fn encode_secret_commits(sc: &SecretCommits) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&SecretCommitJson::from(sc))?)
}

pub fn decode_secret_commits(bytes: &[u8]) -> Result<SecretCommits> {
    let json: SecretCommitJson = serde_json::from_slice(bytes)?;
    SecretCommits::try_from(&json)
}

pub fn encode_dist_key_share(share: &DistKeyShare) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&DistKeyShareJson::from(share))?)
}

pub fn decode_dist_key_share(bytes: &[u8]) -> Result<DistKeyShare> {
    let json: DistKeyShareJson = serde_json::from_slice(bytes)?;
    DistKeyShare::try_from(&json)
}

pub fn encode_secret(envelope: &SecretEnvelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&SecretJson::from(envelope))?)
}

pub fn decode_secret(bytes: &[u8]) -> Result<SecretEnvelope> {
    let json: SecretJson = serde_json::from_slice(bytes)?;
    SecretEnvelope::try_from(&json)
}

pub fn encode_reencrypt_request(request: &ReencryptRequest) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ReencryptSecretRequest::from(request))?)
}

pub fn decode_reencrypt_request(bytes: &[u8]) -> Result<ReencryptRequest> {
    let json: ReencryptSecretRequest = serde_json::from_slice(bytes)?;
    ReencryptRequest::try_from(&json)
}

pub fn encode_reencrypted_share(share: &ReencryptedShare) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ReencryptedSecretShare::from(share))?)
}

pub fn decode_reencrypted_share(bytes: &[u8]) -> Result<ReencryptedShare> {
    let json: ReencryptedSecretShare = serde_json::from_slice(bytes)?;
    ReencryptedShare::try_from(&json)
}

impl From<&Deal> for DealJson {
    fn from(deal: &Deal) -> Self {
        Self {
            dealer_index: deal.dealer_index,
            target_index: deal.target_index,
            encrypted_share: deal.encrypted_share.clone(),
            commitments: encode_points(&deal.commitments),
            session_id: deal.session_id.to_vec(),
            signature: deal.signature.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<&DealJson> for Deal {
    type Error = Error;

    fn try_from(json: &DealJson) -> Result<Self> {
        Ok(Self {
            dealer_index: json.dealer_index,
            target_index: json.target_index,
            encrypted_share: json.encrypted_share.clone(),
            commitments: decode_points(&json.commitments)?,
            session_id: decode_session_id(&json.session_id)?,
            signature: decode_signature(&json.signature)?,
        })
    }
}

impl From<&Response> for ResponseJson {
    fn from(response: &Response) -> Self {
        Self {
            session_id: response.session_id.to_vec(),
            dealer_index: response.dealer_index,
            index: response.index,
            approved: response.status == ResponseStatus::Approve,
            signature: response.signature.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<&ResponseJson> for Response {
    type Error = Error;

    fn try_from(json: &ResponseJson) -> Result<Self> {
        Ok(Self {
            session_id: decode_session_id(&json.session_id)?,
            dealer_index: json.dealer_index,
            index: json.index,
            status: if json.approved {
                ResponseStatus::Approve
            } else {
                ResponseStatus::Complaint
            },
            signature: decode_signature(&json.signature)?,
        })
    }
}

impl From<&Justification> for JustificationJson {
    fn from(justification: &Justification) -> Self {
        Self {
            session_id: justification.session_id.to_vec(),
            dealer_index: justification.dealer_index,
            target_index: justification.target_index,
            share: group::encode_scalar(&justification.share).to_vec(),
            blinding: group::encode_scalar(&justification.blinding).to_vec(),
            signature: justification.signature.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<&JustificationJson> for Justification {
    type Error = Error;

    fn try_from(json: &JustificationJson) -> Result<Self> {
        Ok(Self {
            session_id: decode_session_id(&json.session_id)?,
            dealer_index: json.dealer_index,
            target_index: json.target_index,
            share: group::decode_scalar(&json.share)?,
            blinding: group::decode_scalar(&json.blinding)?,
            signature: decode_signature(&json.signature)?,
        })
    }
}

impl From<&Ready> for ReadyJson {
    fn from(ready: &Ready) -> Self {
        Self {
            index: ready.index,
            context: ready.context.to_vec(),
            signature: ready.signature.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<&ReadyJson> for Ready {
    type Error = Error;

    fn try_from(json: &ReadyJson) -> Result<Self> {
        let context: [u8; 32] = json
            .context
            .as_slice()
            .try_into()
            .map_err(|_| Error::MalformedEncoding("readiness context must be 32 bytes".into()))?;
        Ok(Self {
            index: json.index,
            context,
            signature: decode_signature(&json.signature)?,
        })
    }
}

impl From<&SecretCommits> for SecretCommitJson {
    fn from(sc: &SecretCommits) -> Self {
        Self {
            index: sc.index,
            commitments: encode_points(&sc.commitments),
            session_id: sc.session_id.to_vec(),
            signature: sc.signature.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<&SecretCommitJson> for SecretCommits {
    type Error = Error;

    fn try_from(json: &SecretCommitJson) -> Result<Self> {
        Ok(Self {
            index: json.index,
            commitments: decode_points(&json.commitments)?,
            session_id: decode_session_id(&json.session_id)?,
            signature: decode_signature(&json.signature)?,
        })
    }
}

impl From<&DistKeyShare> for DistKeyShareJson {
    fn from(share: &DistKeyShare) -> Self {
        Self {
            pri_share: PriShareJson {
                i: share.pri_share.index as i64,
                v: group::encode_scalar(&share.pri_share.value).to_vec(),
            },
            commits: encode_points(&share.commits),
        }
    }
}

impl TryFrom<&DistKeyShareJson> for DistKeyShare {
    type Error = Error;

    fn try_from(json: &DistKeyShareJson) -> Result<Self> {
        let index = ParticipantIndex::try_from(json.pri_share.i)
            .map_err(|_| Error::MalformedEncoding("share index out of range".into()))?;
        let value = group::decode_scalar(&json.pri_share.v)?;
        let commits = decode_points(&json.commits)?;
        // A commitment vector always has length t >= 1.
        if commits.is_empty() {
            return Err(Error::MalformedEncoding("empty commitment vector".into()));
        }
        Ok(Self {
            pri_share: PriShare { index, value },
            commits,
        })
    }
}

impl From<&SecretEnvelope> for SecretJson {
    fn from(envelope: &SecretEnvelope) -> Self {
        Self {
            enc_cmt: Some(group::encode_point(&envelope.enc_cmt)),
            enc_scrt: Some(envelope.enc_scrt.clone()),
        }
    }
}

impl TryFrom<&SecretJson> for SecretEnvelope {
    type Error = Error;

    fn try_from(json: &SecretJson) -> Result<Self> {
        let enc_cmt = json
            .enc_cmt
            .as_deref()
            .ok_or_else(|| Error::MalformedEncoding("secret envelope missing enc_cmt".into()))?;
        let enc_scrt = json
            .enc_scrt
            .clone()
            .ok_or_else(|| Error::MalformedEncoding("secret envelope missing enc_scrt".into()))?;
        Ok(Self {
            enc_cmt: group::decode_point(enc_cmt)?,
            enc_scrt,
        })
    }
}

impl From<&ReencryptRequest> for ReencryptSecretRequest {
    fn from(request: &ReencryptRequest) -> Self {
        Self {
            org_id: Some(request.org_id.clone()),
            secret_id: Some(request.secret_id.clone()),
            rdr_pk: Some(group::encode_point(&request.reader_public)),
        }
    }
}

impl TryFrom<&ReencryptSecretRequest> for ReencryptRequest {
    type Error = Error;

    fn try_from(json: &ReencryptSecretRequest) -> Result<Self> {
        let missing = |field: &str| Error::MalformedEncoding(format!("request missing {field}"));
        Ok(Self {
            org_id: json.org_id.clone().ok_or_else(|| missing("org_id"))?,
            secret_id: json.secret_id.clone().ok_or_else(|| missing("secret_id"))?,
            reader_public: group::decode_point(
                json.rdr_pk.as_deref().ok_or_else(|| missing("rdr_pk"))?,
            )?,
        })
    }
}

impl From<&ReencryptedShare> for ReencryptedSecretShare {
    fn from(share: &ReencryptedShare) -> Self {
        Self {
            org_id: Some(share.org_id.clone()),
            secret_id: Some(share.secret_id.clone()),
            rdr_pk: Some(group::encode_point(&share.reader_public)),
            index: share.index as i32,
            xnc_ski: Some(group::encode_point(&share.reencrypted)),
            chlgi: Some(group::encode_scalar(&share.challenge).to_vec()),
            proofi: Some(group::encode_scalar(&share.proof).to_vec()),
        }
    }
}

impl TryFrom<&ReencryptedSecretShare> for ReencryptedShare {
    type Error = Error;

    fn try_from(json: &ReencryptedSecretShare) -> Result<Self> {
        let missing = |field: &str| Error::MalformedEncoding(format!("share missing {field}"));
        let index = ParticipantIndex::try_from(json.index)
            .map_err(|_| Error::MalformedEncoding("share index out of range".into()))?;
        Ok(Self {
            org_id: json.org_id.clone().ok_or_else(|| missing("org_id"))?,
            secret_id: json.secret_id.clone().ok_or_else(|| missing("secret_id"))?,
            reader_public: group::decode_point(
                json.rdr_pk.as_deref().ok_or_else(|| missing("rdr_pk"))?,
            )?,
            index,
            reencrypted: group::decode_point(
                json.xnc_ski.as_deref().ok_or_else(|| missing("xnc_ski"))?,
            )?,
            challenge: group::decode_scalar(
                json.chlgi.as_deref().ok_or_else(|| missing("chlgi"))?,
            )?,
            proof: group::decode_scalar(
                json.proofi.as_deref().ok_or_else(|| missing("proofi"))?,
            )?,
        })
    }
}

fn encode_points(points: &[k256::ProjectivePoint]) -> Vec<Vec<u8>> {
    points.iter().map(group::encode_point).collect()
}

fn decode_points(encoded: &[Vec<u8>]) -> Result<Vec<k256::ProjectivePoint>> {
    encoded.iter().map(|b| group::decode_point(b)).collect()
}

fn decode_session_id(bytes: &[u8]) -> Result<SessionId> {
    bytes
        .try_into()
        .map_err(|_| Error::MalformedEncoding("session id must be 32 bytes".into()))
}

fn decode_signature(bytes: &[u8]) -> Result<Signature> {
    Signature::from_slice(bytes)
        .map_err(|_| Error::MalformedEncoding("invalid signature encoding".into()))
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_list {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        list: &[Vec<u8>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = list.iter().map(|b| STANDARD.encode(b)).collect();
        serde::Serialize::serialize(&encoded, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod b64_list_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        list: &Option<Vec<Vec<u8>>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match list {
            Some(l) => {
                let encoded: Vec<String> = l.iter().map(|b| STANDARD.encode(b)).collect();
                serializer.serialize_some(&encoded)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<Vec<u8>>>, D::Error> {
        let encoded = Option::<Vec<String>>::deserialize(deserializer)?;
        match encoded {
            Some(list) => list
                .iter()
                .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            None => Ok(None),
        }
    }
}
