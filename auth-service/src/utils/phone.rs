const MASK_CHAR: char = '*';
const VISIBLE_DIGITS: usize = 4;

/// Mask a phone number for display, keeping only the last four characters.
///
/// Numbers shorter than four characters are fully masked.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.trim().chars().collect();
    if chars.len() < VISIBLE_DIGITS {
        return MASK_CHAR.to_string().repeat(5);
    }

    let hidden = chars.len() - VISIBLE_DIGITS;
    let mut masked = MASK_CHAR.to_string().repeat(hidden);
    masked.extend(&chars[hidden..]);
    masked
}
