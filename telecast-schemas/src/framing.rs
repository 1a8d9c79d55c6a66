//! Bulk payload framing
//!
//! A payload is either one encoded [`TelecastMessage`](crate::TelecastMessage)
//! or a bulk array introduced by [`FORMAT_PB_ARRAY`]. A protobuf message can
//! never begin with `0x00` (field number zero is reserved), so the first byte
//! alone tells the two apart.

use crate::{SchemaError, SchemaResult};

/// Format tag for an array of protobuf sub-messages
pub const FORMAT_PB_ARRAY: u8 = 0x00;

/// Bytes before the length table: format tag and count
const BULK_PREAMBLE: usize = 2;

/// Split a payload into its sub-messages, in transmission order
///
/// Single (non-bulk) payloads come back as a one-element vector. Lengths that
/// run past the end of the buffer fail the whole payload; nothing is salvaged
/// from a request whose header cannot be trusted.
///
/// ```
/// use telecast_schemas::framing::split;
///
/// let payload = [0x00, 0x02, 0x01, 0x02, 0xAA, 0xBB, 0xCC];
/// let parts = split(&payload).unwrap();
/// assert_eq!(parts, vec![&[0xAA][..], &[0xBB, 0xCC][..]]);
/// ```
pub fn split(payload: &[u8]) -> SchemaResult<Vec<&[u8]>> {
    let Some(&format) = payload.first() else {
        return Err(SchemaError::Empty);
    };

    if format != FORMAT_PB_ARRAY {
        return Ok(vec![payload]);
    }

    if payload.len() < BULK_PREAMBLE {
        return Err(SchemaError::FramingOverrun {
            needed: BULK_PREAMBLE,
            available: payload.len(),
        });
    }

    let count = payload[1] as usize;
    let header_len = BULK_PREAMBLE + count;
    if payload.len() < header_len {
        return Err(SchemaError::FramingOverrun {
            needed: header_len,
            available: payload.len(),
        });
    }

    let lengths = &payload[BULK_PREAMBLE..header_len];
    let needed = header_len + lengths.iter().map(|&l| l as usize).sum::<usize>();
    if payload.len() < needed {
        return Err(SchemaError::FramingOverrun {
            needed,
            available: payload.len(),
        });
    }
    if payload.len() > needed {
        log::debug!(
            "bulk payload carries {} trailing bytes after {} sub-messages",
            payload.len() - needed,
            count
        );
    }

    let mut parts = Vec::with_capacity(count);
    let mut offset = header_len;
    for &len in lengths {
        let end = offset + len as usize;
        parts.push(&payload[offset..end]);
        offset = end;
    }

    Ok(parts)
}

/// Build a bulk payload from already-encoded sub-messages
///
/// Used by relays that batch buffered readings. Each sub-message is limited to
/// 255 bytes and a payload to 255 sub-messages by the one-byte header fields.
pub fn join(messages: &[Vec<u8>]) -> SchemaResult<Vec<u8>> {
    if messages.len() > u8::MAX as usize {
        return Err(SchemaError::FramingOverrun {
            needed: messages.len(),
            available: u8::MAX as usize,
        });
    }

    let body_len: usize = messages.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(BULK_PREAMBLE + messages.len() + body_len);
    out.push(FORMAT_PB_ARRAY);
    out.push(messages.len() as u8);

    for message in messages {
        let len = u8::try_from(message.len()).map_err(|_| SchemaError::FramingOverrun {
            needed: message.len(),
            available: u8::MAX as usize,
        })?;
        out.push(len);
    }
    for message in messages {
        out.extend_from_slice(message);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn two_sub_messages_in_order() {
        let mut payload = vec![0x00, 0x02, 0x05, 0x07];
        payload.extend_from_slice(&[1, 1, 1, 1, 1]);
        payload.extend_from_slice(&[2, 2, 2, 2, 2, 2, 2]);

        let parts = split(&payload).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 5);
        assert_eq!(parts[1].len(), 7);
        assert!(parts[0].iter().all(|&b| b == 1));
        assert!(parts[1].iter().all(|&b| b == 2));
    }

    #[test]
    fn single_message_passes_through() {
        let payload = [0x08, 0x01, 0x10, 0x64];
        let parts = split(&payload).unwrap();
        assert_eq!(parts, vec![&payload[..]]);
    }

    #[test]
    fn overrun_fails_whole_payload() {
        let payload = [0x00, 0x02, 0x05, 0x07, 1, 2, 3];
        assert!(matches!(
            split(&payload),
            Err(SchemaError::FramingOverrun { needed: 16, available: 7 })
        ));
    }

    #[test]
    fn truncated_length_table() {
        assert!(matches!(
            split(&[0x00, 0x03, 0x01]),
            Err(SchemaError::FramingOverrun { .. })
        ));
        assert!(matches!(split(&[0x00]), Err(SchemaError::FramingOverrun { .. })));
    }

    #[test]
    fn empty_payload() {
        assert_eq!(split(&[]), Err(SchemaError::Empty));
    }

    #[test]
    fn zero_count_bulk_is_empty() {
        assert!(split(&[0x00, 0x00]).unwrap().is_empty());
    }

    #[test]
    fn trailing_bytes_ignored() {
        let parts = split(&[0x00, 0x01, 0x01, 0xAA, 0xFF, 0xFF]).unwrap();
        assert_eq!(parts, vec![&[0xAA][..]]);
    }

    #[test]
    fn oversized_sub_message_rejected_by_join() {
        assert!(join(&[vec![0u8; 300]]).is_err());
    }

    proptest! {
        #[test]
        fn split_recovers_joined_parts(
            parts in proptest::collection::vec(
                proptest::collection::vec(1u8..=255, 0..40), 0..12)
        ) {
            let payload = join(&parts).unwrap();
            let recovered = split(&payload).unwrap();
            prop_assert_eq!(recovered.len(), parts.len());
            for (got, want) in recovered.iter().zip(parts.iter()) {
                prop_assert_eq!(*got, want.as_slice());
            }
        }

        #[test]
        fn truncation_never_panics(
            parts in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 1..20), 1..6),
            cut in 0usize..200
        ) {
            let payload = join(&parts).unwrap();
            let cut = cut.min(payload.len());
            let _ = split(&payload[..cut]);
        }
    }
}
