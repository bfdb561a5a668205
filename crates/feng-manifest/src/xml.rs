//! 朴素 XML 元素树与单遍序列化.
//!
//! MPD 文档用一棵 `Element` 代数树表示, 一次遍历输出带缩进与转义的
//! 文本, 不依赖外部 XML 库.

use std::fmt::Write;

/// XML 元素
#[derive(Debug, Clone, Default)]
pub struct Element {
    /// 元素名
    pub name: String,
    /// 属性 (保持插入顺序)
    pub attrs: Vec<(String, String)>,
    /// 子元素
    pub children: Vec<Element>,
    /// 文本内容 (与子元素互斥使用)
    pub text: String,
}

impl Element {
    /// 创建元素
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 链式设置属性
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    /// 链式设置文本
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// 链式追加子元素
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// 追加子元素
    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// 序列化为带 XML 声明的文档
    pub fn to_document(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.write_into(&mut out, 0);
        out
    }

    fn write_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        write!(out, "{indent}<{}", self.name).unwrap();
        for (name, value) in &self.attrs {
            write!(out, " {name}=\"{}\"", escape(value)).unwrap();
        }
        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>\n");
            return;
        }
        if self.children.is_empty() {
            writeln!(out, ">{}</{}>", escape(&self.text), self.name).unwrap();
            return;
        }
        out.push_str(">\n");
        for child in &self.children {
            child.write_into(out, depth + 1);
        }
        writeln!(out, "{indent}</{}>", self.name).unwrap();
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_tree() {
        let doc = Element::new("MPD")
            .attr("type", "static")
            .child(
                Element::new("Period").child(
                    Element::new("AdaptationSet")
                        .attr("contentType", "video")
                        .child(Element::new("Representation").attr("id", "1")),
                ),
            )
            .to_document();

        let expected = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<MPD type=\"static\">\n  <Period>\n    <AdaptationSet contentType=\"video\">\n      \
<Representation id=\"1\"/>\n    </AdaptationSet>\n  </Period>\n</MPD>\n";
        assert_eq!(doc, expected);
    }

    #[test]
    fn test_escaping_and_text() {
        let doc = Element::new("a")
            .attr("v", "x<\"y\">&z")
            .child(Element::new("b").text("1 & 2"))
            .to_document();
        assert!(doc.contains("v=\"x&lt;&quot;y&quot;&gt;&amp;z\""));
        assert!(doc.contains("<b>1 &amp; 2</b>"));
    }
}
