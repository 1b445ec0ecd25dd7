//! 选区范围
//!
//! 用两个边界节点表示用户选区：从 `start` 开始，到 `end` 的整棵子树结束（按文档顺序）。
//! 判断相交前需要先对文档做一次前序编号，见 [`SelectionRange::resolve`]。

use std::collections::HashMap;
use std::rc::Rc;

use markup5ever_rcdom::{Handle, Node, NodeData};

#[derive(Debug, Clone)]
pub struct SelectionRange {
    start: Handle,
    end: Handle,
}

impl SelectionRange {
    pub fn new(start: Handle, end: Handle) -> Self {
        Self { start, end }
    }

    /// 选中单个节点的全部内容
    pub fn around(node: &Handle) -> Self {
        Self::new(node.clone(), node.clone())
    }

    /// 在给定文档上解析出文档顺序区间；边界节点不在文档中时返回 `None`
    pub fn resolve(&self, document: &Handle) -> Option<ResolvedRange> {
        let mut positions = HashMap::new();
        let mut counter = 0usize;
        number(document, &mut counter, &mut positions);

        let start = *positions.get(&Rc::as_ptr(&self.start))?;
        let end = *positions.get(&Rc::as_ptr(&self.end))?;
        let (first, last) = if end.0 < start.0 { (end, start) } else { (start, end) };

        let mut resolved = ResolvedRange {
            positions,
            start: first.0,
            end: last.1.max(first.1),
            text: String::new(),
        };
        resolved.text = resolved.collect_text(document);
        Some(resolved)
    }
}

fn number(node: &Handle, counter: &mut usize, positions: &mut HashMap<*const Node, (usize, usize)>) {
    let pre = *counter;
    *counter += 1;
    for child in node.children.borrow().iter() {
        number(child, counter, positions);
    }
    positions.insert(Rc::as_ptr(node), (pre, *counter - 1));
}

/// 已编号的选区
#[derive(Debug)]
pub struct ResolvedRange {
    positions: HashMap<*const Node, (usize, usize)>,
    start: usize,
    end: usize,
    text: String,
}

impl ResolvedRange {
    /// 节点子树与选区是否有交集
    pub fn intersects(&self, node: &Handle) -> bool {
        match self.positions.get(&Rc::as_ptr(node)) {
            Some(&(pre, last)) => pre <= self.end && last >= self.start,
            None => false,
        }
    }

    /// 选区内的原始文本
    pub fn text(&self) -> &str {
        &self.text
    }

    fn collect_text(&self, node: &Handle) -> String {
        let mut buf = String::new();
        self.push_text(node, &mut buf);
        buf
    }

    fn push_text(&self, node: &Handle, buf: &mut String) {
        if !self.intersects(node) {
            return;
        }
        if let NodeData::Text { contents } = &node.data {
            buf.push_str(&contents.borrow());
        }
        for child in node.children.borrow().iter() {
            self.push_text(child, buf);
        }
    }
}
