// DOS 8.3 wildcard matching. Both sides are uppercased into fixed
// space-padded buffers; '*' ends the name phase, '?' matches one position.
// The pattern extension buffer keeps a fourth byte so an overlong pattern
// extension is rejected unless its fourth character is '*' (DOSBox rule).

fn split(spec: &str) -> (&str, &str) {
    match spec.find('.') {
        Some(i) => (&spec[..i], &spec[i + 1..]),
        None => (spec, ""),
    }
}

fn pad<const N: usize>(part: &str) -> [u8; N] {
    let mut buf = [b' '; N];
    for (i, b) in part.bytes().take(N).enumerate() {
        buf[i] = b.to_ascii_uppercase();
    }
    buf
}

/// A dot file (".", ".." excepted) is invisible to wildcard searches.
fn is_hidden(filename: &str) -> bool {
    filename.len() >= 5 && filename.starts_with('.') && filename != "." && filename != ".."
}

/// Matches an 8.3 `filename` against an 8.3 `pattern`, case-insensitively.
pub fn matches(filename: &str, pattern: &str) -> bool {
    if filename.eq_ignore_ascii_case(pattern) {
        return true;
    }
    if !pattern.contains('*') && !pattern.contains('?') {
        return false;
    }
    if is_hidden(filename) {
        return false;
    }

    let (name, ext) = split(filename);
    let (pat_name, pat_ext) = split(pattern);
    let name: [u8; 8] = pad(name);
    let ext: [u8; 3] = pad(ext);
    let pat_name: [u8; 8] = pad(pat_name);
    let pat_ext_buf: [u8; 4] = pad(pat_ext);

    for i in 0..8 {
        match pat_name[i] {
            b'*' => break,
            b'?' => {}
            c => {
                if c != name[i] {
                    return false;
                }
            }
        }
    }
    if pat_ext.len() > 3 && pat_ext_buf[3] != b'*' {
        return false;
    }
    for i in 0..3 {
        match pat_ext_buf[i] {
            b'*' => return true,
            b'?' => {}
            c => {
                if c != ext[i] {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::matches;

    #[test]
    fn exact_names_match_themselves() {
        for name in ["AUTOEXEC.BAT", "A.TXT", "COMMAND.COM", "NOEXT", "X"] {
            assert!(matches(name, name));
        }
        assert!(matches("readme.txt", "README.TXT"));
    }

    #[test]
    fn star_dot_star_matches_everything_visible() {
        for name in ["A.TXT", "LONGNAME.EXT", "NOEXT", "B", "FOO.C"] {
            assert!(matches(name, "*.*"));
        }
    }

    #[test]
    fn name_star_stops_the_name_phase() {
        assert!(matches("HELLO.COM", "HE*.COM"));
        assert!(matches("HE.COM", "HE*.COM"));
        assert!(!matches("HI.COM", "HE*.COM"));
    }

    #[test]
    fn question_mark_matches_one_position() {
        assert!(matches("A.TXT", "?.TXT"));
        assert!(matches("AB.TXT", "??.TXT"));
        // the padded tail must still agree
        assert!(!matches("ABC.TXT", "??.TXT"));
    }

    #[test]
    fn extension_star_short_circuits() {
        assert!(matches("GAME.DAT", "GAME.*"));
        assert!(matches("GAME", "GAME.*"));
    }

    #[test]
    fn overlong_pattern_extension_needs_a_star() {
        assert!(!matches("A.TXT", "*.TXTX"));
        assert!(matches("A.TXT", "*.TXT*"));
    }

    #[test]
    fn hidden_names_never_match_wildcards() {
        assert!(!matches(".HIDDEN", "*.*"));
        assert!(!matches(".CONFIG", "?CONFIG"));
        // but an exact name still opens
        assert!(matches(".HIDDEN", ".HIDDEN"));
    }
}
