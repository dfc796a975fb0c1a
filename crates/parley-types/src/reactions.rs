//! Reaction reconciliation.
//!
//! A message carries at most one reaction per user. Every request from a user
//! is folded into the current list by [`reconcile`]; the server applies it
//! before persisting and the client applies it optimistically. Live updates
//! carry the actor's resulting emoji and are applied with [`set_reaction`],
//! which is safe to repeat, so both sides converge on the same list.

use uuid::Uuid;

use crate::api::ReactionGroup;
use crate::models::Reaction;

/// Fold one reaction request into `current`.
///
/// - no entry for `actor`: append `{actor, emoji}`
/// - same emoji as the existing entry: remove it (toggle off)
/// - different emoji: replace the emoji in place
/// - `emoji` is `None`: remove the actor's entry if any
pub fn reconcile(current: &[Reaction], actor: Uuid, emoji: Option<&str>) -> Vec<Reaction> {
    let existing = current.iter().position(|r| r.user_id == actor);

    match (existing, emoji) {
        (None, None) => current.to_vec(),
        (None, Some(emoji)) => {
            let mut next = current.to_vec();
            next.push(Reaction {
                user_id: actor,
                emoji: emoji.to_string(),
            });
            next
        }
        (Some(idx), Some(emoji)) if current[idx].emoji != emoji => {
            let mut next = current.to_vec();
            next[idx].emoji = emoji.to_string();
            next
        }
        (Some(_), _) => current
            .iter()
            .filter(|r| r.user_id != actor)
            .cloned()
            .collect(),
    }
}

/// Make `emoji` the actor's reaction, or remove it when `None`.
///
/// Unlike [`reconcile`] this does not toggle: applying the same update twice
/// leaves the list as applying it once.
pub fn set_reaction(current: &[Reaction], actor: Uuid, emoji: Option<&str>) -> Vec<Reaction> {
    let mut next = current.to_vec();
    let existing = next.iter().position(|r| r.user_id == actor);

    match (existing, emoji) {
        (Some(idx), Some(emoji)) => next[idx].emoji = emoji.to_string(),
        (None, Some(emoji)) => next.push(Reaction {
            user_id: actor,
            emoji: emoji.to_string(),
        }),
        (Some(idx), None) => {
            next.remove(idx);
        }
        (None, None) => {}
    }
    next
}

/// The emoji `user` currently has on the message, if any.
pub fn emoji_for(reactions: &[Reaction], user: Uuid) -> Option<&str> {
    reactions
        .iter()
        .find(|r| r.user_id == user)
        .map(|r| r.emoji.as_str())
}

/// Summarize reactions per emoji, in first-seen order.
pub fn group_by_emoji(reactions: &[Reaction]) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for reaction in reactions {
        match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(reaction.user_id);
            }
            None => groups.push(ReactionGroup {
                emoji: reaction.emoji.clone(),
                count: 1,
                user_ids: vec![reaction.user_id],
            }),
        }
    }
    groups
}
