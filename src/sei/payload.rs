// SEI payload extraction
//
// The recorder wraps its protobuf inside a user-data-unregistered SEI
// message: after the two header bytes and one payload-size byte comes a run
// of 0x42 signature bytes, then 0x69, then the protobuf, then one trailing
// byte. The H.264 layer inserts emulation-prevention bytes which must be
// removed before decoding.

/// Locate the protobuf bytes inside a full SEI NAL and strip emulation
/// prevention. Returns None when the signature is absent.
pub fn proto_payload(nal: &[u8]) -> Option<Vec<u8>> {
    if nal.len() < 2 {
        return None;
    }

    let mut i = 3;
    while i + 1 < nal.len() {
        match nal[i] {
            0x42 => i += 1,
            0x69 => return Some(strip_emulation_prevention(&nal[i + 1..nal.len() - 1])),
            _ => return None,
        }
    }
    None
}

/// Delete any 0x03 that immediately follows two consecutive zero bytes;
/// the deletion resets the zero counter.
pub fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zero_count = 0usize;
    for &b in data {
        if zero_count >= 2 && b == 0x03 {
            zero_count = 0;
            continue;
        }
        out.push(b);
        if b == 0x00 {
            zero_count += 1;
        } else {
            zero_count = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_emulation_byte_after_two_zeros() {
        assert_eq!(
            strip_emulation_prevention(&[0x00, 0x00, 0x03, 0xAB]),
            vec![0x00, 0x00, 0xAB]
        );
    }

    #[test]
    fn keeps_0x03_without_zero_prefix() {
        assert_eq!(
            strip_emulation_prevention(&[0x00, 0x03, 0x00, 0x03]),
            vec![0x00, 0x03, 0x00, 0x03]
        );
    }

    #[test]
    fn counter_resets_after_strip() {
        // 00 00 03 03: only the first 03 is an emulation byte.
        assert_eq!(
            strip_emulation_prevention(&[0x00, 0x00, 0x03, 0x03]),
            vec![0x00, 0x00, 0x03]
        );
        // 00 00 00 03: the third zero keeps the window open.
        assert_eq!(
            strip_emulation_prevention(&[0x00, 0x00, 0x00, 0x03]),
            vec![0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn locates_payload_after_signature_run() {
        // header(2) | size byte | 0x42 0x42 | 0x69 | proto | trailing
        let nal = [
            &[0x06u8, 0x05, 0xFF][..],
            &[0x42, 0x42, 0x69][..],
            &[0x0D, 0x15, 0x00, 0x00, 0x48, 0x41][..],
            &[0x80][..],
        ]
        .concat();
        let payload = proto_payload(&nal).unwrap();
        assert_eq!(payload, vec![0x0D, 0x15, 0x00, 0x00, 0x48, 0x41]);
    }

    #[test]
    fn payload_passes_through_emulation_stripping() {
        let nal = [
            &[0x06u8, 0x05, 0xFF][..],
            &[0x42, 0x69][..],
            &[0x0A, 0x00, 0x00, 0x03, 0x01][..],
            &[0x80][..],
        ]
        .concat();
        let payload = proto_payload(&nal).unwrap();
        assert_eq!(payload, vec![0x0A, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn missing_signature_yields_none() {
        let nal = [0x06, 0x05, 0xFF, 0x13, 0x37, 0x80];
        assert!(proto_payload(&nal).is_none());

        // A 0x42 run that never reaches 0x69
        let nal = [0x06, 0x05, 0xFF, 0x42, 0x42, 0x42];
        assert!(proto_payload(&nal).is_none());

        // Too short to carry anything
        assert!(proto_payload(&[0x06]).is_none());
    }
}
