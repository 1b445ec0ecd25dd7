//! 页面上下文
//!
//! 一个 [`Page`] 对应一个被审计的页面：DOM 树、页面地址、当前选区和侧边栏可见性。

use std::cell::{Cell, RefCell};

use markup5ever_rcdom::{Handle, RcDom};
use url::Url;

use crate::error::AuditResult;
use crate::html::dom::{document_language, html_to_dom, parse_html};
use crate::html::{serialize_document, SelectionRange};

pub struct Page {
    dom: RcDom,
    url: Option<Url>,
    selection: RefCell<Option<SelectionRange>>,
    panel_visible: Cell<bool>,
}

impl Page {
    pub fn new(dom: RcDom, url: Option<Url>) -> Self {
        Self {
            dom,
            url,
            selection: RefCell::new(None),
            panel_visible: Cell::new(false),
        }
    }

    pub fn from_html(html: &str, url: Option<Url>) -> Self {
        Self::new(parse_html(html), url)
    }

    /// 按给定编码解码字节后解析
    pub fn from_bytes(data: &[u8], encoding: &str, url: Option<Url>) -> AuditResult<Self> {
        Ok(Self::new(html_to_dom(data, encoding)?, url))
    }

    pub fn document(&self) -> &Handle {
        &self.dom.document
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// 页面主机名，用于站点偏好和导出
    pub fn host(&self) -> Option<String> {
        self.url
            .as_ref()
            .and_then(|url| url.host_str())
            .map(str::to_string)
    }

    /// `<html lang>`
    pub fn declared_language(&self) -> Option<String> {
        document_language(self.document())
    }

    pub fn selection(&self) -> Option<SelectionRange> {
        self.selection.borrow().clone()
    }

    pub fn set_selection(&self, range: SelectionRange) {
        *self.selection.borrow_mut() = Some(range);
    }

    pub fn clear_selection(&self) {
        self.selection.borrow_mut().take();
    }

    pub fn panel_visible(&self) -> bool {
        self.panel_visible.get()
    }

    pub fn set_panel_visible(&self, visible: bool) {
        self.panel_visible.set(visible);
    }

    /// 序列化当前文档（包括已应用的修复）
    pub fn serialize(&self, encoding: &str) -> AuditResult<Vec<u8>> {
        serialize_document(self.document(), encoding)
    }
}
