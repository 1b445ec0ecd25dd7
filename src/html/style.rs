//! 内联样式读取
//!
//! 只解析 `style` 属性中的声明列表，用于装饰性图片判定（背景图、像素尺寸）。

use cssparser::{Delimiter, ParseError, Parser, ParserInput, Token};
use markup5ever_rcdom::Handle;

use super::dom::get_node_attr;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineStyle {
    declarations: Vec<(String, String)>,
}

impl InlineStyle {
    /// 解析声明列表，无法解析的声明被跳过
    pub fn parse(style: &str) -> Self {
        let mut input = ParserInput::new(style);
        let mut parser = Parser::new(&mut input);
        let mut declarations = Vec::new();

        while !parser.is_exhausted() {
            let declaration: Result<(String, String), ParseError<'_, ()>> = parser
                .parse_until_after(Delimiter::Semicolon, |p| {
                    let name = p.expect_ident_cloned()?.to_ascii_lowercase();
                    p.expect_colon()?;
                    let start = p.position();
                    while p.next().is_ok() {}
                    let value = p.slice_from(start).trim();
                    let value = value
                        .strip_suffix("!important")
                        .unwrap_or(value)
                        .trim()
                        .to_string();
                    Ok((name, value))
                });
            if let Ok(declaration) = declaration {
                declarations.push(declaration);
            }
        }

        Self { declarations }
    }

    /// 读取节点的 `style` 属性
    pub fn of(node: &Handle) -> Self {
        get_node_attr(node, "style")
            .map(|style| Self::parse(&style))
            .unwrap_or_default()
    }

    /// 属性值，后出现的声明覆盖前面的
    pub fn get(&self, name: &str) -> Option<&str> {
        self.declarations
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// 是否声明了背景图（`none` 除外）
    pub fn has_background_image(&self) -> bool {
        if let Some(value) = self.get("background-image") {
            return !value.is_empty() && !value.eq_ignore_ascii_case("none");
        }
        self.get("background")
            .is_some_and(|value| value.to_ascii_lowercase().contains("url("))
    }

    /// 以像素为单位的长度；百分比、`auto` 等返回 `None`
    pub fn pixel_length(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(parse_pixels)
    }
}

/// 解析 `16px` 或无单位数字
pub fn parse_pixels(value: &str) -> Option<f32> {
    let mut input = ParserInput::new(value);
    let mut parser = Parser::new(&mut input);
    let pixels = match parser.next() {
        Ok(Token::Dimension { value, unit, .. }) if unit.eq_ignore_ascii_case("px") => Some(*value),
        Ok(Token::Number { value, .. }) => Some(*value),
        _ => None,
    };
    pixels.filter(|_| parser.is_exhausted())
}
