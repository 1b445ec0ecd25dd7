//! 对 DOM 节点的弱引用
//!
//! 问题只记录它关心的节点，从不延长节点的生命周期。节点被丢弃或从文档上摘除后，
//! `upgrade_connected` 返回 `None`，调用方应把该问题视为不可应用。

use std::fmt;
use std::rc::{Rc, Weak};

use markup5ever_rcdom::{Handle, Node};

use super::dom::{get_node_name, is_connected};

#[derive(Clone)]
pub struct NodeRef {
    node: Weak<Node>,
}

impl NodeRef {
    pub fn new(node: &Handle) -> Self {
        Self {
            node: Rc::downgrade(node),
        }
    }

    /// 节点仍然存活（不检查是否挂在文档上）
    pub fn upgrade(&self) -> Option<Handle> {
        self.node.upgrade()
    }

    /// 节点存活且仍连接在文档上
    pub fn upgrade_connected(&self) -> Option<Handle> {
        self.node.upgrade().filter(is_connected)
    }

    pub fn is_live(&self) -> bool {
        self.upgrade_connected().is_some()
    }

    pub fn points_to(&self, node: &Handle) -> bool {
        self.node.upgrade().is_some_and(|own| Rc::ptr_eq(&own, node))
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node.upgrade() {
            Some(node) => write!(f, "NodeRef(<{}>)", get_node_name(&node).unwrap_or("#node")),
            None => f.write_str("NodeRef(<dropped>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::dom::{first_element, parse_html, remove_node};

    #[test]
    fn test_detached_node_is_not_live() {
        let dom = parse_html("<p><img src=a.png></p>");
        let img = first_element(&dom.document, &["img"]).unwrap();
        let node_ref = NodeRef::new(&img);
        assert!(node_ref.is_live());
        assert!(node_ref.points_to(&img));

        remove_node(&img);
        assert!(!node_ref.is_live());
        assert!(node_ref.upgrade().is_some());

        drop(img);
        assert!(node_ref.upgrade().is_none());
        assert_eq!(format!("{:?}", node_ref), "NodeRef(<dropped>)");
    }
}
