// 该文件是 Biaozhu （标注） 项目的一部分。
// src/catalog.rs - 类别表（类别 ID 与显示名称映射）
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("类别表读取错误 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
  pub id: u32,
  pub display_name: String,
}

/// 类别表，加载后只读
#[derive(Debug, Clone, Default)]
pub struct Catalog {
  items: Vec<CatalogItem>,
}

impl FromIterator<CatalogItem> for Catalog {
  fn from_iter<I: IntoIterator<Item = CatalogItem>>(iter: I) -> Self {
    Catalog {
      items: iter.into_iter().collect(),
    }
  }
}

impl Catalog {
  /// 按扩展名选择格式：`.pbtxt` 为 protobuf 文本块，其余为 `<id> <名称>` 行格式
  pub fn load(path: &Path) -> Result<Self, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
      path: path.display().to_string(),
      source,
    })?;

    let is_pbtxt = path
      .extension()
      .is_some_and(|ext| ext.eq_ignore_ascii_case("pbtxt"));
    let catalog = if is_pbtxt {
      Self::parse_pbtxt(&text)
    } else {
      Self::parse_lines(&text)
    };

    debug!("从 {} 加载 {} 个类别", path.display(), catalog.len());
    Ok(catalog)
  }

  /// 解析 `item { id: 1 display_name: "person" }` 形式的记录，格式错误的记录被跳过
  pub fn parse_pbtxt(text: &str) -> Self {
    let text = strip_comments(text);
    let mut items = Vec::new();
    let mut rest = text.as_str();

    while let Some(open) = rest.find('{') {
      let Some(close) = rest[open..].find('}') else {
        warn!("类别表记录缺少结束括号，忽略剩余内容");
        break;
      };
      let body = &rest[open + 1..open + close];
      match parse_record(body) {
        Some(item) => items.push(item),
        None => warn!("跳过格式错误的类别记录: {}", body.trim()),
      }
      rest = &rest[open + close + 1..];
    }

    Catalog { items }
  }

  /// 解析 `<id> <名称>` 行格式，例如 `1 person`、`10 traffic light`
  pub fn parse_lines(text: &str) -> Self {
    text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .filter_map(|line| {
        let mut parts = line.splitn(2, char::is_whitespace);
        let id = parts.next().and_then(parse_id);
        let name = parts.next().map(str::trim).filter(|name| !name.is_empty());
        match (id, name) {
          (Some(id), Some(name)) => Some(CatalogItem {
            id,
            display_name: name.to_string(),
          }),
          _ => {
            warn!("跳过格式错误的类别行: {}", line);
            None
          }
        }
      })
      .collect()
  }

  /// 按 ID 查找类别，存在重复 ID 时返回第一个
  pub fn find(&self, id: u32) -> Option<&CatalogItem> {
    self.items.iter().find(|item| item.id == id)
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

fn strip_comments(text: &str) -> String {
  text
    .lines()
    .map(|line| match line.find('#') {
      Some(pos) if !line[..pos].contains('"') => &line[..pos],
      _ => line,
    })
    .collect::<Vec<_>>()
    .join("\n")
}

fn parse_id(value: &str) -> Option<u32> {
  value.parse::<u32>().ok().filter(|id| *id > 0)
}

fn parse_record(body: &str) -> Option<CatalogItem> {
  let mut id = None;
  let mut display_name = None;
  let mut name = None;

  for (key, value) in fields(body)? {
    match key {
      "id" => id = Some(parse_id(value)?),
      "display_name" => display_name = Some(value.to_string()),
      "name" => name = Some(value.to_string()),
      _ => {}
    }
  }

  let display_name = display_name.or(name).filter(|name| !name.is_empty())?;
  Some(CatalogItem {
    id: id?,
    display_name,
  })
}

/// 将记录体拆分为 `key: value` 对，值可以是带引号的字符串
fn fields(body: &str) -> Option<Vec<(&str, &str)>> {
  let mut pairs = Vec::new();
  let mut rest = body.trim_start();

  while !rest.is_empty() {
    let colon = rest.find(':')?;
    let key = rest[..colon].trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
      return None;
    }
    rest = rest[colon + 1..].trim_start();

    let value;
    if let Some(quoted) = rest.strip_prefix('"') {
      let end = quoted.find('"')?;
      value = &quoted[..end];
      rest = &quoted[end + 1..];
    } else {
      let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
      value = &rest[..end];
      rest = &rest[end..];
    }

    pairs.push((key, value));
    rest = rest.trim_start();
  }

  Some(pairs)
}
