//! 分段模板展开.
//!
//! DASH SegmentTemplate 标识符: `$Number$`, `$Time$`, `$Bandwidth$`,
//! 以及 `$$` 转义; 标识符内支持 `%0Nd` 宽度格式 (如 `$Number%05d$`).

use feng_core::{FengError, FengResult};

/// 展开一个分段模板
pub fn expand_template(
    template: &str,
    number: u64,
    time: u64,
    bandwidth: u32,
) -> FengResult<String> {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            return Err(FengError::InvalidArgument(format!(
                "分段模板 {template} 中的 $ 未闭合"
            )));
        };
        let token = &after[..end];
        rest = &after[end + 1..];

        if token.is_empty() {
            out.push('$'); // $$ 转义
            continue;
        }
        let (name, format) = match token.find('%') {
            Some(pos) => (&token[..pos], Some(&token[pos..])),
            None => (token, None),
        };
        let value = match name {
            "Number" => number,
            "Time" => time,
            "Bandwidth" => u64::from(bandwidth),
            other => {
                return Err(FengError::InvalidArgument(format!(
                    "未知模板标识符 ${other}$"
                )))
            }
        };
        match format {
            None => out.push_str(&value.to_string()),
            Some(fmt) => {
                let width = parse_width(fmt).ok_or_else(|| {
                    FengError::InvalidArgument(format!("非法格式 {fmt} (期望 %0Nd)"))
                })?;
                out.push_str(&format!("{value:0width$}"));
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// 解析 `%0Nd` 形式的宽度
fn parse_width(fmt: &str) -> Option<usize> {
    let inner = fmt.strip_prefix("%0")?.strip_suffix('d')?;
    inner.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tokens() {
        assert_eq!(
            expand_template("seg-$Number$.m4s", 7, 0, 0).unwrap(),
            "seg-7.m4s"
        );
        assert_eq!(
            expand_template("$Time$-$Bandwidth$.m4s", 1, 90000, 1_200_000).unwrap(),
            "90000-1200000.m4s"
        );
    }

    #[test]
    fn test_width_format() {
        assert_eq!(
            expand_template("seg-$Number%05d$.m4s", 42, 0, 0).unwrap(),
            "seg-00042.m4s"
        );
    }

    #[test]
    fn test_dollar_escape() {
        assert_eq!(expand_template("a$$b-$Number$", 3, 0, 0).unwrap(), "a$b-3");
    }

    #[test]
    fn test_errors() {
        assert!(expand_template("bad-$Number", 1, 0, 0).is_err());
        assert!(expand_template("bad-$Foo$", 1, 0, 0).is_err());
        assert!(expand_template("bad-$Number%5x$", 1, 0, 0).is_err());
    }
}
