#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AbortedSubTransactionSet {
    #[prost(uint32, repeated, tag = "1")]
    pub set: ::prost::alloc::vec::Vec<u32>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionStatePb {
    #[prost(bytes = "vec", tag = "1")]
    pub transaction_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(enumeration = "TransactionStatus", tag = "2")]
    pub status: i32,
    #[prost(string, repeated, tag = "3")]
    pub tablets: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(int64, repeated, tag = "4")]
    pub tablet_batches: ::prost::alloc::vec::Vec<i64>,
    #[prost(uint64, tag = "5")]
    pub commit_hybrid_time: u64,
    #[prost(bool, tag = "6")]
    pub sealed: bool,
    #[prost(message, optional, tag = "7")]
    pub aborted: ::core::option::Option<AbortedSubTransactionSet>,
    #[prost(uint64, optional, tag = "8")]
    pub external_hybrid_time: ::core::option::Option<u64>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateTransactionRequest {
    #[prost(string, tag = "1")]
    pub tablet_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub state: ::core::option::Option<TransactionStatePb>,
    #[prost(uint64, tag = "3")]
    pub propagated_hybrid_time: u64,
    #[prost(bool, tag = "4")]
    pub is_external: bool,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateTransactionResponse {
    #[prost(uint64, tag = "1")]
    pub propagated_hybrid_time: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTransactionStatusRequest {
    #[prost(string, tag = "1")]
    pub tablet_id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub transaction_ids: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    #[prost(uint64, tag = "3")]
    pub propagated_hybrid_time: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTransactionStatusResponse {
    #[prost(enumeration = "TransactionStatus", repeated, tag = "1")]
    pub status: ::prost::alloc::vec::Vec<i32>,
    #[prost(uint64, repeated, tag = "2")]
    pub status_hybrid_time: ::prost::alloc::vec::Vec<u64>,
    #[prost(uint64, repeated, tag = "3")]
    pub coordinator_safe_time: ::prost::alloc::vec::Vec<u64>,
    #[prost(message, repeated, tag = "4")]
    pub aborted_subtxn_set: ::prost::alloc::vec::Vec<AbortedSubTransactionSet>,
    #[prost(uint64, tag = "5")]
    pub propagated_hybrid_time: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTransactionStatusAtParticipantRequest {
    #[prost(string, tag = "1")]
    pub tablet_id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub transaction_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub propagated_hybrid_time: u64,
    #[prost(int64, optional, tag = "4")]
    pub required_num_replicated_batches: ::core::option::Option<i64>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTransactionStatusAtParticipantResponse {
    #[prost(bool, tag = "1")]
    pub aborted: bool,
    #[prost(int64, tag = "2")]
    pub num_replicated_batches: i64,
    #[prost(uint64, tag = "3")]
    pub status_hybrid_time: u64,
    #[prost(uint64, tag = "4")]
    pub propagated_hybrid_time: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AbortTransactionRequest {
    #[prost(string, tag = "1")]
    pub tablet_id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub transaction_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub propagated_hybrid_time: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AbortTransactionResponse {
    #[prost(enumeration = "TransactionStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub status_hybrid_time: u64,
    #[prost(uint64, tag = "3")]
    pub propagated_hybrid_time: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockingTransaction {
    #[prost(bytes = "vec", tag = "1")]
    pub transaction_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "2")]
    pub status_tablet: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WaitForReportRequest {
    #[prost(string, tag = "1")]
    pub tablet_id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub waiter: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    pub blockers: ::prost::alloc::vec::Vec<BlockingTransaction>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WaitForReportResponse {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProbeRequest {
    #[prost(string, tag = "1")]
    pub tablet_id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub probe_origin: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub probe_num: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub blocking_transaction_id: ::prost::alloc::vec::Vec<u8>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProbeResponse {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub deadlocked_transaction_ids: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    #[prost(bool, tag = "2")]
    pub should_erase_probe: bool,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionMetadataPb {
    #[prost(bytes = "vec", tag = "1")]
    pub transaction_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "2")]
    pub status_tablet: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub start_hybrid_time: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IntentValue {
    #[prost(uint32, tag = "1")]
    pub subtransaction_id: u32,
    #[prost(uint32, tag = "2")]
    pub write_id: u32,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub value: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegularValue {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub value: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEntry {
    #[prost(int64, tag = "1")]
    pub term: i64,
    #[prost(int64, tag = "2")]
    pub index: i64,
    #[prost(uint64, tag = "3")]
    pub hybrid_time: u64,
    #[prost(message, optional, tag = "4")]
    pub state: ::core::option::Option<TransactionStatePb>,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TransactionStatus {
    Created = 1,
    Pending = 2,
    Committed = 4,
    Sealed = 5,
    AppliedInAllInvolvedTablets = 7,
    Aborted = 8,
    Promoted = 9,
    Applying = 20,
    AppliedInOneOfInvolvedTablets = 21,
    ImmediateCleanup = 22,
    GracefulCleanup = 23,
}
impl TransactionStatus {
    /// String value of the enum field names used in the ProtoBuf definition.
    ///
    /// The values are not transformed in any way and thus are considered stable
    /// (if the ProtoBuf definition does not change) and safe for programmatic use.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "Created",
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Committed => "Committed",
            TransactionStatus::Sealed => "Sealed",
            TransactionStatus::AppliedInAllInvolvedTablets => "AppliedInAllInvolvedTablets",
            TransactionStatus::Aborted => "Aborted",
            TransactionStatus::Promoted => "Promoted",
            TransactionStatus::Applying => "Applying",
            TransactionStatus::AppliedInOneOfInvolvedTablets => "AppliedInOneOfInvolvedTablets",
            TransactionStatus::ImmediateCleanup => "ImmediateCleanup",
            TransactionStatus::GracefulCleanup => "GracefulCleanup",
        }
    }
    /// Creates an enum from field names used in the ProtoBuf definition.
    pub fn from_str_name(value: &str) -> ::core::option::Option<Self> {
        match value {
            "Created" => Some(Self::Created),
            "Pending" => Some(Self::Pending),
            "Committed" => Some(Self::Committed),
            "Sealed" => Some(Self::Sealed),
            "AppliedInAllInvolvedTablets" => Some(Self::AppliedInAllInvolvedTablets),
            "Aborted" => Some(Self::Aborted),
            "Promoted" => Some(Self::Promoted),
            "Applying" => Some(Self::Applying),
            "AppliedInOneOfInvolvedTablets" => Some(Self::AppliedInOneOfInvolvedTablets),
            "ImmediateCleanup" => Some(Self::ImmediateCleanup),
            "GracefulCleanup" => Some(Self::GracefulCleanup),
            _ => None,
        }
    }
}
