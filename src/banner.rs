//! Banner probes, display-safe decoding and banner-based service identification.
use crate::ports::well_known_service;
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum stored banner length, in characters.
pub const MAX_BANNER_CHARS: usize = 100;
/// Maximum bytes read from a service while grabbing a banner.
pub const MAX_BANNER_BYTES: usize = 1024;
/// Bytes rendered when a banner is shown as hex.
const HEX_DUMP_BYTES: usize = 50;
const MAX_VERSION_CHARS: usize = 20;

const HTTP_HEAD: &[u8] = b"HEAD / HTTP/1.0\r\n\r\n";
const SMTP_EHLO: &[u8] = b"EHLO lan-sweep.local\r\n";
const IMAP_CAPABILITY: &[u8] = b"a001 CAPABILITY\r\n";
// COM_PING: 3-byte length, sequence id, command byte.
const MYSQL_PING: &[u8] = &[0x01, 0x00, 0x00, 0x00, 0x0e];
// TDS pre-login request.
const MSSQL_PRELOGIN: &[u8] = &[
    0x12, 0x01, 0x00, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x15, 0x00, 0x06, 0x01, 0x00,
    0x1b, 0x00, 0x01, 0x02, 0x00, 0x1c, 0x00, 0x0c, 0x03, 0x00, 0x28, 0x00, 0x04, 0xff, 0x08,
    0x00, 0x01, 0x55, 0x00, 0x00, 0x00, 0x4d, 0x53, 0x53, 0x51, 0x4c, 0x53, 0x65, 0x72, 0x76,
    0x65, 0x72, 0x00, 0x48, 0x0f, 0x00, 0x00,
];
// SSLRequest; the server answers a single 'S' or 'N'.
const POSTGRES_SSL_REQUEST: &[u8] = &[0x00, 0x00, 0x00, 0x08, 0x04, 0xd2, 0x16, 0x2f];
const REDIS_PING: &[u8] = b"PING\r\n";
const MEMCACHED_VERSION: &[u8] = b"version\r\n";

/// Probe bytes to send after connecting, keyed by well-known port.
///
/// Services that greet first (SSH, FTP, POP3, Telnet, VNC) and unknown ports get
/// nothing: the banner is whatever the service sends on its own.
pub fn tcp_probe(port: u16) -> Option<&'static [u8]> {
    match port {
        80 | 81 | 591 | 8000 | 8008 | 8080 | 8081 | 8888 => Some(HTTP_HEAD),
        25 | 587 => Some(SMTP_EHLO),
        143 => Some(IMAP_CAPABILITY),
        3306 => Some(MYSQL_PING),
        1433 => Some(MSSQL_PRELOGIN),
        5432 => Some(POSTGRES_SSL_REQUEST),
        6379 => Some(REDIS_PING),
        11211 => Some(MEMCACHED_VERSION),
        _ => None,
    }
}

const DNS_NS_QUERY: &[u8] = &[
    0x12, 0x34, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
    0x00, 0x01,
];
const SNMP_GET_PUBLIC: &[u8] = &[
    0x30, 0x26, 0x02, 0x01, 0x00, 0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', 0xa0, 0x19,
    0x02, 0x04, 0x71, 0xb4, 0xb5, 0x68, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0b, 0x30,
    0x09, 0x06, 0x05, 0x2b, 0x06, 0x01, 0x02, 0x01, 0x05, 0x00,
];
const IKE_MAIN_MODE: &[u8] = &[
    0x4c, 0x61, 0x6e, 0x53, 0x77, 0x65, 0x65, 0x70, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x01, 0x10, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1c,
];
const SSDP_MSEARCH: &[u8] = b"M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nMX: 1\r\nST: ssdp:all\r\n\r\n";
const MDNS_SERVICES_QUERY: &[u8] = &[
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, b'_', b's',
    b'e', b'r', b'v', b'i', b'c', b'e', b's', 0x07, b'_', b'd', b'n', b's', b'-', b's', b'd',
    0x04, b'_', b'u', b'd', b'p', 0x05, b'l', b'o', b'c', b'a', b'l', 0x00, 0x00, 0x0c, 0x00,
    0x01,
];
const SYSLOG_MESSAGE: &[u8] = b"<14>lan-sweep: probe";

/// UDP ports known to answer unsolicited probes, with the probe to send.
///
/// Every other UDP port is skipped: without a reply, closed and filtered look the same.
pub fn udp_probe(port: u16) -> Option<&'static [u8]> {
    match port {
        53 => Some(DNS_NS_QUERY),
        123 => Some(NTP_CLIENT_REQUEST.as_slice()),
        161 => Some(SNMP_GET_PUBLIC),
        500 => Some(IKE_MAIN_MODE),
        514 => Some(SYSLOG_MESSAGE),
        1900 => Some(SSDP_MSEARCH),
        5353 => Some(MDNS_SERVICES_QUERY),
        _ => None,
    }
}

// LI=0, VN=3, Mode=3 (client); the rest of the 48-byte header is zero.
static NTP_CLIENT_REQUEST: [u8; 48] = {
    let mut req = [0u8; 48];
    req[0] = 0x1b;
    req
};

/// Ordered banner signatures; the first service with a matching pattern wins.
const SIGNATURES: &[(&str, &[&[u8]])] = &[
    ("SSH", &[b"SSH-"]),
    ("HTTP", &[b"HTTP/1.", b"HTTP/2", b"<html", b"<HTML"]),
    ("SMTP", &[b"ESMTP", b"SMTP", b"Postfix", b"Exim", b"250-"]),
    ("FTP", &[b"FTP", b"FileZilla", b"vsFTPd", b"ProFTPD"]),
    ("IMAP", &[b"* OK", b"IMAP4", b"* CAPABILITY"]),
    ("POP3", &[b"+OK"]),
    ("MySQL", &[b"mysql_native_password", b"MariaDB", b"MySQL"]),
    ("Redis", &[b"+PONG", b"-NOAUTH", b"redis_version"]),
    ("Memcached", &[b"VERSION "]),
    ("VNC", &[b"RFB "]),
    ("Telnet", &[b"\xff\xfb", b"\xff\xfd"]),
    ("MSSQL", &[b"\x04\x01\x00"]),
];

/// Identify a service from banner bytes, falling back to the port table, then `Unknown`.
pub fn identify_service(banner: &[u8], port: u16) -> String {
    if !banner.is_empty() {
        for (name, patterns) in SIGNATURES {
            if patterns.iter().any(|p| contains(banner, p)) {
                return (*name).to_string();
            }
        }
    }
    well_known_service(port).unwrap_or("Unknown").to_string()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

static VERSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(\d+\.\d+\.\d+)",
        r"(?i)\bv(\d+\.\d+)",
        r"(?i)\bversion[:\s]+([\w.\-]+)",
        r"(?i)\bver[:.\s]*(\d[\w.\-]*)",
        r"[_/](\d+\.\d+[\w.\-]*)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

// Protocol tokens such as `HTTP/1.1` are not product versions.
static PROTOCOL_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bHTTP/\d(?:\.\d)?").expect("valid protocol regex"));

/// First version-looking capture in the decoded banner, at most 20 characters.
pub fn extract_version(banner: &str) -> Option<String> {
    let banner = PROTOCOL_TOKEN.replace_all(banner, "");
    VERSION_PATTERNS.iter().find_map(|re| {
        re.captures(&banner)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().chars().take(MAX_VERSION_CHARS).collect())
    })
}

/// Decode arbitrary bytes into a display-safe string of at most 100 characters.
///
/// Valid UTF-8 is kept; mostly-text bytes are decoded lossily, then as Latin-1;
/// anything else becomes a hex dump of the first 50 bytes. Never fails.
pub fn decode_banner(bytes: &[u8]) -> String {
    let text = if let Ok(s) = std::str::from_utf8(bytes) {
        s.to_string()
    } else {
        let lossy = String::from_utf8_lossy(bytes);
        let replaced = lossy.chars().filter(|&c| c == char::REPLACEMENT_CHARACTER).count();
        if replaced * 4 <= lossy.chars().count() {
            lossy.into_owned()
        } else if printable_ratio(bytes) >= 0.75 {
            bytes.iter().map(|&b| b as char).collect()
        } else {
            hex_dump(bytes)
        }
    };
    sanitize(text.trim())
}

fn printable_ratio(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 1.0;
    }
    let printable = bytes
        .iter()
        .filter(|&&b| b.is_ascii_graphic() || b == b' ' || b >= 0xa0)
        .count();
    printable as f64 / bytes.len() as f64
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(HEX_DUMP_BYTES)
        .map(|b| format!("{b:02x}"))
        .collect()
}

// Escape line breaks, mask other control characters, cap the length.
fn sanitize(text: &str) -> String {
    let mut out = String::new();
    for c in text.chars() {
        let piece = match c {
            '\r' => "\\r".to_string(),
            '\n' => "\\n".to_string(),
            '\t' => " ".to_string(),
            c if c.is_control() => ".".to_string(),
            c => c.to_string(),
        };
        out.push_str(&piece);
    }
    out.chars().take(MAX_BANNER_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_banner_identified_with_version() {
        let raw = b"SSH-2.0-OpenSSH_8.9\r\n";
        assert_eq!(identify_service(raw, 2222), "SSH");
        let text = decode_banner(raw);
        assert_eq!(text, "SSH-2.0-OpenSSH_8.9");
        assert_eq!(extract_version(&text).as_deref(), Some("8.9"));
    }

    #[test]
    fn http_server_header_version() {
        let raw = b"HTTP/1.0 200 OK\r\nServer: nginx/1.18.0\r\n\r\n";
        assert_eq!(identify_service(raw, 8081), "HTTP");
        assert_eq!(extract_version(&decode_banner(raw)).as_deref(), Some("1.18.0"));
    }

    #[test]
    fn http_status_line_is_not_a_version() {
        let iis = b"HTTP/1.1 200 OK\r\nServer: Microsoft-IIS/10.0\r\n\r\n";
        assert_eq!(extract_version(&decode_banner(iis)).as_deref(), Some("10.0"));
        let nginx = b"HTTP/1.1 404 Not Found\r\nServer: nginx/1.18\r\n\r\n";
        assert_eq!(extract_version(&decode_banner(nginx)).as_deref(), Some("1.18"));
        assert_eq!(extract_version("HTTP/1.0 200 OK"), None);
    }

    #[test]
    fn unmatched_banner_falls_back_to_port_then_unknown() {
        assert_eq!(identify_service(b"hello", 3389), "RDP");
        assert_eq!(identify_service(b"", 5432), "PostgreSQL");
        assert_eq!(identify_service(b"hello", 40000), "Unknown");
    }

    #[test]
    fn version_patterns_in_order() {
        assert_eq!(extract_version("Server v2.4 ready").as_deref(), Some("2.4"));
        assert_eq!(extract_version("FooD version 7b").as_deref(), Some("7b"));
        assert_eq!(extract_version("Ver 3").as_deref(), Some("3"));
        assert_eq!(extract_version("no digits here"), None);
        let long = extract_version("1.2.3456789012345678901234").unwrap();
        assert!(long.chars().count() <= 20);
    }

    #[test]
    fn decode_never_exceeds_limit() {
        assert_eq!(decode_banner(b""), "");
        let long = vec![b'A'; 4096];
        assert_eq!(decode_banner(&long).chars().count(), MAX_BANNER_CHARS);
        let binary: Vec<u8> = (0u8..=255).collect();
        let decoded = decode_banner(&binary);
        assert!(decoded.chars().count() <= MAX_BANNER_CHARS);
        assert!(!decoded.chars().any(char::is_control));
    }

    #[test]
    fn binary_noise_becomes_hex() {
        let noise = [0x00, 0x81, 0x02, 0x93, 0x04, 0xfe, 0x06, 0x87];
        assert_eq!(decode_banner(&noise), "0081029304fe0687");
    }

    #[test]
    fn latin1_text_is_kept_readable() {
        let raw = b"Caf\xe9 \xe0 la cr\xe8me server";
        let decoded = decode_banner(raw);
        assert!(decoded.starts_with("Caf"));
        assert!(decoded.ends_with("server"));
    }

    #[test]
    fn udp_allow_list() {
        for port in [53, 123, 161, 500, 514, 1900, 5353] {
            assert!(udp_probe(port).is_some(), "{port} should be allow-listed");
        }
        assert!(udp_probe(12345).is_none());
        assert_eq!(udp_probe(123).map(<[u8]>::len), Some(48));
    }
}
