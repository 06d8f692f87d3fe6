use unicode_normalization::UnicodeNormalization;

pub fn normalize_text(input: &str) -> String {
    // Remove diacritics by decomposing to NFD and filtering combining marks
    let stripped: String = input
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `len` characters of the normalized text.
pub fn prefix(input: &str, len: usize) -> String {
    normalize_text(input).chars().take(len).collect()
}

/// American Soundex. Non-ASCII letters are dropped after diacritic removal;
/// an input with no letters yields an empty code.
pub fn soundex(input: &str) -> String {
    let chars: Vec<char> = normalize_text(input)
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if chars.is_empty() { return String::new(); }
    let code = |c: char| -> char {
        match c {
            'B' | 'F' | 'P' | 'V' => '1',
            'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => '2',
            'D' | 'T' => '3',
            'L' => '4',
            'M' | 'N' => '5',
            'R' => '6',
            _ => '0',
        }
    };
    let mut out = String::with_capacity(4);
    out.push(chars[0]);
    let mut last = code(chars[0]);
    for &ch in &chars[1..] {
        let c = code(ch);
        // H and W do not separate letters with the same code
        if ch == 'H' || ch == 'W' { continue; }
        if c != '0' && c != last {
            out.push(c);
            if out.len() == 4 { break; }
        }
        last = c;
    }
    while out.len() < 4 { out.push('0'); }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_diacritics() {
        assert_eq!(normalize_text("Álvaro"), "alvaro");
        assert_eq!(normalize_text("ÉÉ"), "ee");
        assert_eq!(normalize_text("  José   María "), "jose maria");
    }

    #[test]
    fn test_prefix() {
        assert_eq!(prefix("  Smithson", 3), "smi");
        assert_eq!(prefix("Al", 5), "al");
    }

    #[test]
    fn test_soundex() {
        assert_eq!(soundex("Robert"), "R163");
        assert_eq!(soundex("Rupert"), "R163");
        assert_eq!(soundex("Ashcraft"), "A261");
        assert_eq!(soundex("Tymczak"), "T522");
        assert_eq!(soundex("Smith"), soundex("Smyth"));
        assert_eq!(soundex("123"), "");
    }
}
