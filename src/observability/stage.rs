//! 阶段观察者
//!
//! 主循环每进入一个阶段（规划、行动、反思……）调用 add_stage(title, content)；
//! FlowGraphSink 把阶段写成节点 + 边的 JSON 文件，供前端流程图展示。
//! 写文件失败只记 warn，不影响主循环。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

/// 每行最多几个节点
const NODES_PER_ROW: usize = 5;
const COLUMN_WIDTH: i64 = 400;
const ROW_HEIGHT: i64 = 500;
const TOP_MARGIN: i64 = 50;

pub trait StageSink: Send + Sync {
    /// 新增阶段，返回阶段 id（从 0 递增）
    fn add_stage(&self, title: &str, content: &str) -> usize;

    /// 修改已有阶段的标题或内容；id 不存在时忽略
    fn amend_stage(&self, id: usize, title: Option<&str>, content: Option<&str>);
}

/// 什么也不做
#[derive(Debug, Default)]
pub struct NoopSink {
    next: Mutex<usize>,
}

impl StageSink for NoopSink {
    fn add_stage(&self, _title: &str, _content: &str) -> usize {
        match self.next.lock() {
            Ok(mut n) => {
                let id = *n;
                *n += 1;
                id
            }
            Err(_) => 0,
        }
    }

    fn amend_stage(&self, _id: usize, _title: Option<&str>, _content: Option<&str>) {}
}

#[derive(Debug, Clone, Serialize)]
struct Position {
    x: i64,
    y: i64,
}

#[derive(Debug, Clone, Serialize)]
struct NodeData {
    title: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct Node {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    position: Position,
    data: NodeData,
}

#[derive(Debug, Clone, Serialize)]
struct Marker {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Edge {
    id: String,
    source: String,
    target: String,
    animated: bool,
    marker_end: Marker,
}

#[derive(Debug, Default, Serialize)]
struct FlowGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// 把阶段写成流程图 JSON 文件；每次变更后整体重写
pub struct FlowGraphSink {
    path: PathBuf,
    graph: Mutex<FlowGraph>,
}

impl FlowGraphSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            graph: Mutex::new(FlowGraph::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, graph: &FlowGraph) {
        let result = serde_json::to_string_pretty(graph)
            .map_err(std::io::Error::other)
            .and_then(|json| {
                if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::write(&self.path, json)
            });
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write flow graph");
        }
    }
}

fn node_position(id: usize) -> Position {
    Position {
        x: COLUMN_WIDTH * (id % NODES_PER_ROW) as i64,
        y: TOP_MARGIN + ROW_HEIGHT * (id / NODES_PER_ROW) as i64,
    }
}

impl StageSink for FlowGraphSink {
    fn add_stage(&self, title: &str, content: &str) -> usize {
        let Ok(mut graph) = self.graph.lock() else {
            return 0;
        };
        let id = graph.nodes.len();
        graph.nodes.push(Node {
            id: id.to_string(),
            kind: "custom",
            position: node_position(id),
            data: NodeData {
                title: title.to_string(),
                content: content.to_string(),
            },
        });
        if id > 0 {
            graph.edges.push(Edge {
                id: format!("e{}-{}", id - 1, id),
                source: (id - 1).to_string(),
                target: id.to_string(),
                animated: true,
                marker_end: Marker {
                    kind: "arrowclosed",
                },
            });
        }
        self.write(&graph);
        id
    }

    fn amend_stage(&self, id: usize, title: Option<&str>, content: Option<&str>) {
        let Ok(mut graph) = self.graph.lock() else {
            return;
        };
        let Some(node) = graph.nodes.get_mut(id) else {
            return;
        };
        if let Some(t) = title {
            node.data.title = t.to_string();
        }
        if let Some(c) = content {
            node.data.content = c.to_string();
        }
        self.write(&graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn read(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_flow_graph_nodes_and_edges() {
        let dir = TempDir::new().unwrap();
        let sink = FlowGraphSink::new(dir.path().join("viz/flow.json"));
        for i in 0..7 {
            assert_eq!(sink.add_stage(&format!("stage {i}"), "body"), i);
        }
        let v = read(sink.path());
        let nodes = v["nodes"].as_array().unwrap();
        let edges = v["edges"].as_array().unwrap();
        assert_eq!(nodes.len(), 7);
        assert_eq!(edges.len(), 6);
        assert_eq!(nodes[0]["type"], "custom");
        assert_eq!(nodes[6]["id"], "6");
        assert_eq!(nodes[6]["position"]["x"], 400);
        assert_eq!(nodes[6]["position"]["y"], 550);
        assert_eq!(edges[0]["id"], "e0-1");
        assert_eq!(edges[5]["source"], "5");
        assert_eq!(edges[5]["target"], "6");
        assert_eq!(edges[5]["animated"], true);
        assert_eq!(edges[5]["markerEnd"]["type"], "arrowclosed");
    }

    #[test]
    fn test_amend_stage() {
        let dir = TempDir::new().unwrap();
        let sink = FlowGraphSink::new(dir.path().join("flow.json"));
        let id = sink.add_stage("Action", "pending");
        sink.amend_stage(id, None, Some("DateProvider -> 2024-01-01"));
        sink.amend_stage(42, Some("ignored"), None);
        let v = read(sink.path());
        assert_eq!(v["nodes"][0]["data"]["title"], "Action");
        assert_eq!(v["nodes"][0]["data"]["content"], "DateProvider -> 2024-01-01");
    }

    #[test]
    fn test_noop_sink_counts_ids() {
        let sink = NoopSink::default();
        assert_eq!(sink.add_stage("a", ""), 0);
        assert_eq!(sink.add_stage("b", ""), 1);
    }
}
