use thiserror::Error;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message shorter than DNS header ({0} bytes)")]
    ShortHeader(usize),
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("label of {0} octets exceeds 63")]
    LabelTooLong(usize),
    #[error("domain name exceeds 255 octets")]
    NameTooLong,
    #[error("too many compression pointers")]
    PointerLoop,
    #[error("reserved label type {0:#04x}")]
    BadLabelType(u8),
}

/// An entry of the question section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub record_type: u16,
}

/// An entry of the answer section. Only the owner name and type are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub name: String,
    pub record_type: u16,
}

/// The parts of a DNS message the watcher classifies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub id: u16,
    pub is_response: bool,
    pub op_code: u8,
    pub response_code: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<Answer>,
}

impl DecodedMessage {
    /// Decode a DNS message (RFC 1035 Section 4.1)
    ///
    /// ```text
    ///     +---------------------+
    ///     |        Header       |  12 bytes
    ///     +---------------------+
    ///     |       Question      |  QDCOUNT entries
    ///     +---------------------+
    ///     |        Answer       |  ANCOUNT RRs
    ///     +---------------------+
    ///     |      Authority      |  ignored
    ///     +---------------------+
    ///     |      Additional     |  ignored
    ///     +---------------------+
    /// ```
    ///
    /// Header flags word:
    /// ```text
    ///  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
    /// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
    /// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
    /// ```
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::ShortHeader(data.len()));
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let qd_count = u16::from_be_bytes([data[4], data[5]]) as usize;
        let an_count = u16::from_be_bytes([data[6], data[7]]) as usize;

        let mut offset = HEADER_LEN;

        // Counts come off the wire; don't let them size the allocation.
        let mut questions = Vec::with_capacity(qd_count.min(16));
        for _ in 0..qd_count {
            let name = parse_domain_name(data, &mut offset)?;
            // QTYPE(2) + QCLASS(2)
            if offset + 4 > data.len() {
                return Err(DecodeError::Truncated("question"));
            }
            let record_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            offset += 4;
            questions.push(Question { name, record_type });
        }

        let mut answers = Vec::with_capacity(an_count.min(16));
        for _ in 0..an_count {
            let name = parse_domain_name(data, &mut offset)?;
            // TYPE(2) + CLASS(2) + TTL(4) + RDLENGTH(2)
            if offset + 10 > data.len() {
                return Err(DecodeError::Truncated("answer"));
            }
            let record_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let rdlength = u16::from_be_bytes([data[offset + 8], data[offset + 9]]) as usize;
            offset += 10;
            if offset + rdlength > data.len() {
                return Err(DecodeError::Truncated("rdata"));
            }
            offset += rdlength;
            answers.push(Answer { name, record_type });
        }

        Ok(Self {
            id,
            is_response: flags & 0x8000 != 0,
            op_code: ((flags >> 11) & 0x0F) as u8,
            response_code: flags & 0x000F,
            questions,
            answers,
        })
    }
}

/// Parse a domain name with compression support (RFC 1035 Section 4.1.4)
///
/// Labels are joined with dots; the root name decodes to an empty string.
/// On return `offset` points past the name as it appears at the original
/// position, i.e. past the first pointer if one was followed.
fn parse_domain_name(data: &[u8], offset: &mut usize) -> Result<String, DecodeError> {
    let mut name = Vec::new();
    let mut pos = *offset;
    let mut resume_at = None;
    let mut jumps = 0;

    loop {
        let Some(&len_byte) = data.get(pos) else {
            return Err(DecodeError::Truncated("name"));
        };

        match len_byte & 0xC0 {
            0x00 => {}
            0xC0 => {
                let Some(&low) = data.get(pos + 1) else {
                    return Err(DecodeError::Truncated("name"));
                };
                if resume_at.is_none() {
                    resume_at = Some(pos + 2);
                }
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(DecodeError::PointerLoop);
                }
                pos = (((len_byte & 0x3F) as usize) << 8) | low as usize;
                continue;
            }
            other => return Err(DecodeError::BadLabelType(other)),
        }

        let len = len_byte as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len > MAX_LABEL_LEN {
            return Err(DecodeError::LabelTooLong(len));
        }

        pos += 1;
        if pos + len > data.len() {
            return Err(DecodeError::Truncated("label"));
        }
        if !name.is_empty() {
            name.push(b'.');
        }
        name.extend_from_slice(&data[pos..pos + len]);
        pos += len;

        if name.len() > MAX_NAME_LEN {
            return Err(DecodeError::NameTooLong);
        }
    }

    *offset = resume_at.unwrap_or(pos);
    Ok(String::from_utf8_lossy(&name).into_owned())
}
