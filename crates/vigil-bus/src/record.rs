//! Raw log records and key-based partitioning.

/// Where a record came from on the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Topic (subject) the record was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: u32,
    /// Position of the record within the log.
    pub offset: u64,
}

/// One record as delivered by a [`RecordConsumer`](crate::RecordConsumer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Partition key. Replies default to this key.
    pub key: Option<String>,
    /// Raw value, expected to be a UTF-8 JSON document.
    pub value: Vec<u8>,
    /// Topic, partition, and offset of the record.
    pub metadata: RecordMetadata,
}

/// Pick the partition for a key.
///
/// Uses 32-bit FNV-1a over the key bytes, so the same key always lands on the
/// same partition regardless of process or platform. Records without a key
/// go to partition 0, as does everything when `partitions <= 1`.
pub fn partition_for(key: Option<&str>, partitions: u32) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let Some(key) = key else {
        return 0;
    };
    if partitions <= 1 {
        return 0;
    }
    let hash = key.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    });
    #[allow(clippy::arithmetic_side_effects)]
    {
        hash.wrapping_rem(partitions)
    }
}
