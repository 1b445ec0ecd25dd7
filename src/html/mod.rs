//! HTML 文档工具
//!
//! 基于 html5ever / markup5ever_rcdom 的 DOM 读取、变更与序列化。

pub mod dom;
pub mod node_ref;
pub mod range;
pub mod serializer;
pub mod style;
pub mod text;

pub use dom::{html_to_dom, parse_html};
pub use node_ref::NodeRef;
pub use range::{ResolvedRange, SelectionRange};
pub use serializer::{serialize_document, serialize_to_string};
pub use style::InlineStyle;
