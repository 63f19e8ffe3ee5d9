//! Literal decoding for the IDL grammar.

/// Parses a decimal, hex (`0x1F`) or octal (`017`) integer literal.
pub fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };

    if negative {
        if magnitude == 1 << 63 {
            Some(i64::MIN)
        } else {
            i64::try_from(magnitude).ok().map(|v| -v)
        }
    } else {
        i64::try_from(magnitude).ok()
    }
}

/// Decodes one quoted string literal, quotes included.
pub fn unescape_string(literal: &str) -> Result<String, String> {
    let body = literal
        .get(1..literal.len().saturating_sub(1))
        .filter(|_| literal.len() >= 2)
        .ok_or_else(|| format!("malformed string literal {}", literal))?;

    let mut out: Vec<u8> = Vec::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let escape = chars
            .next()
            .ok_or_else(|| "dangling escape in string literal".to_string())?;
        match escape {
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0C),
            'v' => out.push(0x0B),
            '\\' | '\'' | '"' | '?' => out.push(escape as u8),
            'x' | 'X' => {
                let mut value = 0u32;
                let mut count = 0;
                while count < 2 {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            chars.next();
                            count += 1;
                        }
                        None => break,
                    }
                }
                if count == 0 {
                    return Err("\\x escape without hex digits".to_string());
                }
                out.push(value as u8);
            }
            '0'..='7' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push((value & 0xFF) as u8);
            }
            'u' | 'U' => {
                let width = if escape == 'u' { 4 } else { 8 };
                let mut value = 0u32;
                for _ in 0..width {
                    let digit = chars
                        .next()
                        .and_then(|c| c.to_digit(16))
                        .ok_or_else(|| format!("\\{} escape needs {} hex digits", escape, width))?;
                    value = value * 16 + digit;
                }
                let ch = char::from_u32(value)
                    .ok_or_else(|| format!("invalid code point U+{:X}", value))?;
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            other => return Err(format!("unknown escape '\\{}'", other)),
        }
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-7"), Some(-7));
        assert_eq!(parse_int("0x1F"), Some(31));
        assert_eq!(parse_int("017"), Some(15));
        assert_eq!(parse_int("0"), Some(0));
        assert_eq!(parse_int("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_int("18446744073709551616"), None);
    }

    #[test]
    fn test_unescape_string() {
        assert_eq!(unescape_string("\"plain\"").unwrap(), "plain");
        assert_eq!(unescape_string("'single'").unwrap(), "single");
        assert_eq!(unescape_string(r#""a\"b\n""#).unwrap(), "a\"b\n");
        assert_eq!(unescape_string(r#""\x41\101é""#).unwrap(), "AAé");
        assert!(unescape_string(r#""\q""#).is_err());
    }
}
