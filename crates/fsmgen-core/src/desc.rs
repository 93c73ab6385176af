// Plain machine description
//
// A serializable mirror of the builder calls, for front ends that hand the
// reduced machine over as data. Action references are indices into
// `MachineDesc::actions`.

use crate::action::Action;
use crate::builder::FsmBuilder;
use crate::fsm::RedFsm;
use crate::keys::{IntType, KeyRange};
use crate::{ActionId, BuildFailure, ModelError, StateId};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MachineDesc {
    pub alphabet: IntType,
    #[cfg_attr(feature = "serde", serde(default))]
    pub actions: Vec<Action>,
    pub states: Vec<StateDesc>,
    pub start: StateId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub error: Option<StateId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub entry_points: Vec<(String, StateId)>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub exports: Vec<(String, i64)>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cond_spaces: Vec<CondSpaceDesc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StateDesc {
    pub transitions: Vec<TransDesc>,
    pub default: Option<TargetDesc>,
    pub conds: Vec<CondDesc>,
    pub to_state: Vec<ActionId>,
    pub from_state: Vec<ActionId>,
    pub eof: Vec<ActionId>,
    pub eof_trans: Option<TargetDesc>,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransDesc {
    pub low: i64,
    pub high: i64,
    pub target: StateId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub actions: Vec<ActionId>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetDesc {
    pub target: StateId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub actions: Vec<ActionId>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CondDesc {
    pub low: i64,
    pub high: i64,
    pub space: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CondSpaceDesc {
    pub base_key: i64,
    pub conditions: Vec<ActionId>,
}

impl MachineDesc {
    /// Replays the description through an [`FsmBuilder`].
    pub fn build(&self) -> Result<RedFsm, BuildFailure> {
        let mut b = FsmBuilder::new(self.alphabet);
        let ids: Vec<ActionId> = self.actions.iter().map(|a| b.add_action(a.clone())).collect();
        let map = |list: &[ActionId]| -> Result<Vec<ActionId>, ModelError> {
            list.iter()
                .map(|&a| ids.get(a as usize).copied().ok_or(ModelError::UnknownAction(a)))
                .collect()
        };

        b.ensure_states(self.states.len());
        b.set_start(self.start);
        if let Some(e) = self.error {
            b.set_error(e);
        }
        for space in &self.cond_spaces {
            b.add_cond_space(space.base_key, &map(&space.conditions)?);
        }
        for (id, s) in self.states.iter().enumerate() {
            let id = id as StateId;
            for t in &s.transitions {
                b.add_transition(id, KeyRange::new(t.low, t.high), t.target, &map(&t.actions)?);
            }
            if let Some(d) = &s.default {
                b.set_default(id, d.target, &map(&d.actions)?);
            }
            for c in &s.conds {
                b.add_state_cond(id, KeyRange::new(c.low, c.high), c.space);
            }
            b.set_to_state_actions(id, &map(&s.to_state)?);
            b.set_from_state_actions(id, &map(&s.from_state)?);
            b.set_eof_actions(id, &map(&s.eof)?);
            if let Some(e) = &s.eof_trans {
                b.set_eof_transition(id, e.target, &map(&e.actions)?);
            }
            b.set_final(id, s.is_final);
        }
        for (name, s) in &self.entry_points {
            b.add_entry_point(name.clone(), *s);
        }
        for (name, key) in &self.exports {
            b.add_export(name.clone(), *key);
        }
        b.build()
    }
}
