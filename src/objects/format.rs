//! printf-style formatting used by the `format` builtin.
//!
//! Supported verbs: `%v %d %s %q %f %t %c %x %X %%`, with the flags `-`,
//! `+` and `0`, a width and a `.precision`. A verb that does not fit its
//! argument renders as `%!verb(type=value)`; a missing argument renders as
//! `%!verb(MISSING)`.

use super::errors::{Error, Result};
use super::{MAX_STRING_LEN, Object};

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    plus: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String) -> String {
        let len = body.chars().count();
        let Some(width) = self.width.filter(|w| *w > len) else {
            return body;
        };
        let fill = width - len;
        if self.left {
            return format!("{}{}", body, " ".repeat(fill));
        }
        if self.zero {
            // zeros go after the sign
            let (sign, digits) = match body.strip_prefix(['-', '+']) {
                Some(rest) => (&body[..1], rest),
                None => ("", body.as_str()),
            };
            return format!("{}{}{}", sign, "0".repeat(fill), digits);
        }
        format!("{}{}", " ".repeat(fill), body)
    }

    fn signed(&self, body: String, negative: bool) -> String {
        if self.plus && !negative {
            format!("+{}", body)
        } else {
            body
        }
    }
}

fn bad_verb(verb: char, arg: &Object) -> String {
    format!("%!{}({}={})", verb, arg.type_name(), arg.to_plain_string())
}

fn hex_string(bytes: &[u8], upper: bool) -> String {
    bytes
        .iter()
        .map(|b| {
            if upper {
                format!("{:02X}", b)
            } else {
                format!("{:02x}", b)
            }
        })
        .collect()
}

fn render(verb: char, spec: &Spec, arg: &Object) -> String {
    let body = match (verb, arg) {
        ('v', Object::Float(v)) | ('f', Object::Float(v)) => {
            let s = match spec.precision {
                Some(p) => format!("{:.*}", p, v),
                None if verb == 'f' => format!("{:.6}", v),
                None => v.to_string(),
            };
            spec.signed(s, *v < 0.0)
        }
        ('f', Object::Int(v)) => {
            let p = spec.precision.unwrap_or(6);
            spec.signed(format!("{:.*}", p, *v as f64), *v < 0)
        }
        ('v', Object::Int(v)) | ('d', Object::Int(v)) => spec.signed(v.to_string(), *v < 0),
        ('d', Object::Char(c)) => (*c as u32).to_string(),
        ('v', _) | ('s', _) => {
            let s = arg.to_plain_string();
            match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        }
        ('q', Object::String(s)) => format!("{:?}", s.as_ref()),
        ('q', Object::Char(c)) => format!("{:?}", c),
        ('t', Object::Bool(b)) => b.to_string(),
        ('c', Object::Char(c)) => c.to_string(),
        ('c', Object::Int(v)) => match arg.to_char() {
            Some(c) => c.to_string(),
            None => format!("%!c(int={})", v),
        },
        ('x', Object::Int(v)) => hex_int(*v, false),
        ('X', Object::Int(v)) => hex_int(*v, true),
        ('x', Object::String(s)) => hex_string(s.as_bytes(), false),
        ('X', Object::String(s)) => hex_string(s.as_bytes(), true),
        ('x', Object::Bytes(b)) => hex_string(&b.borrow(), false),
        ('X', Object::Bytes(b)) => hex_string(&b.borrow(), true),
        _ => return bad_verb(verb, arg),
    };
    spec.pad(body)
}

fn hex_int(v: i64, upper: bool) -> String {
    let magnitude = v.unsigned_abs();
    let digits = if upper {
        format!("{:X}", magnitude)
    } else {
        format!("{:x}", magnitude)
    };
    if v < 0 { format!("-{}", digits) } else { digits }
}

/// Format `args` according to `fmt`.
pub fn format(fmt: &str, args: &[Object]) -> Result<String> {
    let mut out = String::with_capacity(fmt.len());
    let mut next_arg = 0;
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                '0' => spec.zero = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = read_number(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(read_number(&mut chars).unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        // width and precision size the rendered text before the length check
        let requested = spec.width.unwrap_or(0).max(spec.precision.unwrap_or(0));
        if requested > MAX_STRING_LEN.saturating_sub(out.len()) {
            return Err(Error::StringLimit);
        }
        match args.get(next_arg) {
            Some(arg) => out.push_str(&render(verb, &spec, arg)),
            None => out.push_str(&format!("%!{}(MISSING)", verb)),
        }
        next_arg += 1;

        if out.len() > MAX_STRING_LEN {
            return Err(Error::StringLimit);
        }
    }

    if next_arg < args.len() {
        let extra: Vec<String> = args[next_arg..]
            .iter()
            .map(|a| format!("{}={}", a.type_name(), a.to_plain_string()))
            .collect();
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }

    if out.len() > MAX_STRING_LEN {
        return Err(Error::StringLimit);
    }
    Ok(out)
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut value: Option<usize> = None;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(d as usize));
        chars.next();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(f: &str, args: &[Object]) -> String {
        format(f, args).unwrap()
    }

    #[test]
    fn test_plain_text_and_percent() {
        assert_eq!(fmt("100%%", &[]), "100%");
        assert_eq!(fmt("no verbs", &[]), "no verbs");
    }

    #[test]
    fn test_basic_verbs() {
        assert_eq!(fmt("%d-%s", &[Object::Int(7), Object::string("x")]), "7-x");
        assert_eq!(fmt("%v", &[Object::string("x")]), "x");
        assert_eq!(fmt("%q", &[Object::string("x")]), "\"x\"");
        assert_eq!(fmt("%t", &[Object::Bool(true)]), "true");
        assert_eq!(fmt("%c", &[Object::Char('z')]), "z");
        assert_eq!(fmt("%c", &[Object::Int(65)]), "A");
        assert_eq!(fmt("%x %X", &[Object::Int(255), Object::Int(255)]), "ff FF");
        assert_eq!(fmt("%x", &[Object::string("hi")]), "6869");
        assert_eq!(
            fmt("%v", &[Object::array(vec![Object::Int(1), Object::string("a")])]),
            "[1, \"a\"]"
        );
    }

    #[test]
    fn test_width_and_precision() {
        assert_eq!(fmt("%5d|", &[Object::Int(42)]), "   42|");
        assert_eq!(fmt("%-5d|", &[Object::Int(42)]), "42   |");
        assert_eq!(fmt("%05d", &[Object::Int(-42)]), "-0042");
        assert_eq!(fmt("%+d", &[Object::Int(3)]), "+3");
        assert_eq!(fmt("%.2f", &[Object::Float(3.14159)]), "3.14");
        assert_eq!(fmt("%f", &[Object::Float(1.5)]), "1.500000");
        assert_eq!(fmt("%.3s", &[Object::string("abcdef")]), "abc");
    }

    #[test]
    fn test_mismatches_are_rendered_inline() {
        assert_eq!(fmt("%d", &[Object::string("x")]), "%!d(string=x)");
        assert_eq!(fmt("%d %d", &[Object::Int(1)]), "1 %!d(MISSING)");
        assert_eq!(fmt("%d", &[Object::Int(1), Object::Int(2)]), "1%!(EXTRA int=2)");
    }

    #[test]
    fn test_oversized_width_and_precision() {
        assert_eq!(
            format("%99999999999999999999d", &[Object::Int(1)]),
            Err(Error::StringLimit)
        );
        assert_eq!(
            format("%.99999999999999999999f", &[Object::Float(1.0)]),
            Err(Error::StringLimit)
        );
        let width = format!("%{}d", MAX_STRING_LEN + 1);
        assert_eq!(format(&width, &[Object::Int(1)]), Err(Error::StringLimit));
        assert_eq!(fmt("%3d", &[Object::Int(1)]), "  1");
    }
}
