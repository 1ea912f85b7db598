//! Quoting other posts into the input.

/// Insert a `>>id` link into `text` at `cursor` (in code points), optionally
/// followed by `selection` quoted line by line.
///
/// Whitespace is added around the link so it never glues onto neighbouring
/// words. Returns the new text and the cursor position after the insertion.
pub fn insert_reference(
    text: &str,
    cursor: usize,
    id: u64,
    selection: Option<&str>,
) -> (String, usize) {
    let chars: Vec<char> = text.chars().collect();
    let pos = cursor.min(chars.len());
    let selection = selection.filter(|s| !s.is_empty());
    let quoting = selection.is_some();

    let mut glued = false;
    let mut s = match pos.checked_sub(1).map(|i| chars[i]) {
        None | Some('\n') => {
            glued = true;
            format!(">>{id}")
        }
        Some(' ') => format!(">>{id}"),
        Some(_) if quoting => format!("\n>>{id}"),
        Some(_) => format!(" >>{id}"),
    };

    match chars.get(pos) {
        None | Some(' ') | Some('\n') => {
            if glued || quoting {
                s.push('\n');
            }
            glued = false;
        }
        Some(_) => {
            glued = true;
            s.push(if quoting { '\n' } else { ' ' });
        }
    }

    if let Some(sel) = selection {
        for line in sel.split('\n') {
            s.push('>');
            s.push_str(line);
            s.push('\n');
        }
        if glued {
            s.push('\n');
        }
    }

    let inserted = s.chars().count();
    let mut out: String = chars[..pos].iter().collect();
    out.push_str(&s);
    out.extend(&chars[pos..]);
    (out, pos + inserted - usize::from(glued))
}
