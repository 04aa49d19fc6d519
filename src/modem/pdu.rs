//! SMS-SUBMIT PDU encoding (GSM 7-bit, optional concatenation header).

use crate::notify::gsm;

/// One part ready for `AT+CMGS=<tpdu_len>` followed by `hex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPdu {
    pub hex: String,
    /// Octets after the SMSC field.
    pub tpdu_len: usize,
}

const FIRST_OCTET: u8 = 0x01;
const UDHI: u8 = 0x40;
const TYPE_INTERNATIONAL: u8 = 0x91;
const TYPE_UNKNOWN: u8 = 0x81;
// 05 00 03 ref total seq, plus one fill bit to reach a septet boundary.
const UDH_SEPTETS: usize = 7;

fn push_hex(out: &mut String, bytes: &[u8]) {
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
}

/// Destination address: digit count, type of number, swapped semi-octets.
fn encode_address(number: &str) -> Vec<u8> {
    let international = number.trim_start().starts_with('+');
    let digits: Vec<u8> = number
        .bytes()
        .filter(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .collect();

    let mut out = vec![digits.len() as u8];
    out.push(if international {
        TYPE_INTERNATIONAL
    } else {
        TYPE_UNKNOWN
    });
    for pair in digits.chunks(2) {
        let low = pair[0];
        let high = pair.get(1).copied().unwrap_or(0x0F);
        out.push((high << 4) | low);
    }
    out
}

/// Encode `text` for `number`. Text over one segment is split into
/// concatenated parts sharing `reference`.
pub fn encode_submit(number: &str, text: &str, reference: u8) -> Vec<SubmitPdu> {
    let septets = gsm::to_septets(text);
    let address = encode_address(number);

    if septets.len() <= gsm::SINGLE_SEGMENT_SEPTETS {
        return vec![build(&address, None, &septets)];
    }

    let parts = gsm::split_septets(&septets, gsm::CONCAT_SEGMENT_SEPTETS);
    let total = parts.len() as u8;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| build(&address, Some([0x05, 0x00, 0x03, reference, total, i as u8 + 1]), part))
        .collect()
}

fn build(address: &[u8], udh: Option<[u8; 6]>, septets: &[u8]) -> SubmitPdu {
    let mut tpdu = Vec::with_capacity(16 + septets.len());
    tpdu.push(if udh.is_some() {
        FIRST_OCTET | UDHI
    } else {
        FIRST_OCTET
    });
    tpdu.push(0x00); // TP-MR, assigned by the modem
    tpdu.extend_from_slice(address);
    tpdu.push(0x00); // TP-PID
    tpdu.push(0x00); // TP-DCS: GSM 7-bit

    match udh {
        Some(header) => {
            tpdu.push((UDH_SEPTETS + septets.len()) as u8);
            tpdu.extend_from_slice(&header);
            tpdu.extend(gsm::pack_septets(septets, 1));
        }
        None => {
            tpdu.push(septets.len() as u8);
            tpdu.extend(gsm::pack_septets(septets, 0));
        }
    }

    // SCA length 0: use the SMSC stored on the SIM.
    let mut hex = String::from("00");
    push_hex(&mut hex, &tpdu);
    SubmitPdu {
        hex,
        tpdu_len: tpdu.len(),
    }
}
