/// Label used for record types and op codes missing from their table.
pub const UNKNOWN: &str = "UNKNOWN";

/// Label used for `NOERROR` and for any response code missing from the table.
pub const OK: &str = "OK";

/// DNS Record Types (RFC 1035 Section 3.2.2, RFC 3596, RFC 2782)
const RECORD_TYPES: &[(u16, &str)] = &[
    (1, "A"),
    (2, "NS"),
    (3, "MD"),
    (4, "MF"),
    (5, "CNAME"),
    (6, "SOA"),
    (7, "MB"),
    (8, "MG"),
    (9, "MR"),
    (10, "NULL"),
    (11, "WKS"),
    (12, "PTR"),
    (13, "HINFO"),
    (14, "MINFO"),
    (15, "MX"),
    (16, "TXT"),
    (28, "AAAA"),
    (33, "SRV"),
];

/// DNS Response Codes (RFC 1035 Section 4.1.1, RFC 2136, RFC 2845, RFC 2930, RFC 6891)
///
/// Codes 16 and above only travel in the extended RCODE (EDNS/TSIG), but the
/// table is keyed on the full 12-bit value so they are labelled when present.
const RESPONSE_CODES: &[(u16, &str)] = &[
    (1, "FormErr"),
    (2, "ServFail"),
    (3, "NXDomain"),
    (4, "NotImp"),
    (5, "Refused"),
    (6, "YXDomain"),
    (7, "YXRRSet"),
    (8, "NXRRSet"),
    (9, "NotAuth"),
    (10, "NotZone"),
    (16, "BadVers"),
    (17, "BadKey"),
    (18, "BadTime"),
    (19, "BadMode"),
    (20, "BadName"),
    (21, "BadAlg"),
    (22, "BadTruc"),
];

/// DNS Op Codes (RFC 1035 Section 4.1.1, RFC 1996, RFC 2136)
const OP_CODES: &[(u8, &str)] = &[
    (0, "Query"),
    (1, "IQuery"),
    (2, "Status"),
    (4, "Notify"),
    (5, "Update"),
];

fn lookup<T: PartialEq + Copy>(table: &[(T, &'static str)], value: T) -> Option<&'static str> {
    table
        .iter()
        .find(|(code, _)| *code == value)
        .map(|(_, label)| *label)
}

/// Tag label for a record type, `UNKNOWN` for anything outside the table.
pub fn record_type_label(rtype: u16) -> &'static str {
    lookup(RECORD_TYPES, rtype).unwrap_or(UNKNOWN)
}

/// Tag label for a response code.
///
/// `NOERROR` and unrecognised codes both come out as `OK`.
pub fn response_code_label(rcode: u16) -> &'static str {
    lookup(RESPONSE_CODES, rcode).unwrap_or(OK)
}

/// Tag label for an op code, `UNKNOWN` for anything outside the table.
pub fn op_code_label(opcode: u8) -> &'static str {
    lookup(OP_CODES, opcode).unwrap_or(UNKNOWN)
}
