//! 目标选择器：把用户输入的机器 / 服务 / 单元名称校验并转换为 `TargetRef`

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TargetKind, TargetRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("({id}) not a valid {kind} id")]
pub struct SelectorError {
    pub kind: TargetKind,
    pub id: String,
}

/// 机器 ID：`0`、`12`、`0/lxc/1`、`3/kvm/0/lxc/2`
pub fn is_valid_machine(id: &str) -> bool {
    let mut parts = id.split('/');
    let Some(root) = parts.next() else {
        return false;
    };
    if !is_number(root) {
        return false;
    }
    let rest: Vec<&str> = parts.collect();
    if rest.len() % 2 != 0 {
        return false;
    }
    rest.chunks(2).all(|pair| {
        !pair[0].is_empty() && pair[0].bytes().all(|b| b.is_ascii_lowercase()) && is_number(pair[1])
    })
}

/// 服务名：小写字母开头，由 `-` 分隔，每段至少含一个字母
pub fn is_valid_service(name: &str) -> bool {
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return false;
    }
    name.split('-').all(|segment| {
        !segment.is_empty()
            && segment
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            && segment.bytes().any(|b| b.is_ascii_lowercase())
    })
}

/// 单元名：`<service>/<number>`
pub fn is_valid_unit(name: &str) -> bool {
    match name.split_once('/') {
        Some((service, number)) => is_valid_service(service) && is_number(number),
        None => false,
    }
}

fn is_number(s: &str) -> bool {
    match s.as_bytes() {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        bytes => bytes.iter().all(u8::is_ascii_digit),
    }
}

/// 命令行上收集到的目标选择
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSelector {
    pub machines: Vec<String>,
    pub services: Vec<String>,
    pub units: Vec<String>,
}

impl TargetSelector {
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty() && self.services.is_empty() && self.units.is_empty()
    }

    /// 校验全部名称并按 机器、服务、单元 的顺序生成目标
    pub fn resolve(&self) -> Result<Vec<TargetRef>, SelectorError> {
        let mut targets =
            Vec::with_capacity(self.machines.len() + self.services.len() + self.units.len());

        for id in &self.machines {
            targets.push(checked(TargetKind::Machine, id, is_valid_machine)?);
        }
        for name in &self.services {
            targets.push(checked(TargetKind::Service, name, is_valid_service)?);
        }
        for name in &self.units {
            targets.push(checked(TargetKind::Unit, name, is_valid_unit)?);
        }

        Ok(targets)
    }
}

fn checked(kind: TargetKind, id: &str, valid: fn(&str) -> bool) -> Result<TargetRef, SelectorError> {
    if !valid(id) {
        return Err(SelectorError {
            kind,
            id: id.to_string(),
        });
    }
    Ok(match kind {
        TargetKind::Machine => TargetRef::machine(id),
        TargetKind::Service => TargetRef::service(id),
        TargetKind::Unit => TargetRef::unit(id),
    })
}
