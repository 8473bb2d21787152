//! Transfer propagation
//!
//! Pure, synchronous propagation of funds through the frozen pledge/take
//! graph. Nothing here touches the database or the processor: the input
//! is the working set, the output is mutated working balances plus a list
//! of pending transfers for the committer.
//!
//! Determinism matters: participants settle oldest-claimed first, so when
//! card holds cap what a giver can move, earlier-verified receivers are
//! not starved by later ones. Each snapshot row settles at most once, so
//! running a pass twice over the same working set changes nothing.

use patron_types::{Cents, TransferContext};
use tracing::debug;

use super::snapshot::{PendingTransfer, WorkingSet};

/// Floor on the per-cycle take throttle.
const TAKE_THROTTLE_FLOOR: Cents = Cents(100);

/// Settle every funded pledge. Returns the number settled this pass.
///
/// A pledge is funded iff its amount fits in the source's working balance
/// or the source has a covering card hold. Unfunded pledges are dropped
/// for the cycle; there are no partial pledges.
pub fn apply_tips(ws: &mut WorkingSet) -> usize {
    let mut settled = 0;
    let mut tips = std::mem::take(&mut ws.tips);

    for tip in tips.iter_mut() {
        if tip.settled || tip.amount.is_zero() {
            continue;
        }
        let Some(source) = ws.participant(&tip.tipper) else {
            continue;
        };
        let funded = tip.amount <= source.new_balance || source.hold_ok;
        if !funded {
            debug!(
                tipper = %tip.tipper,
                tippee = %tip.tippee,
                amount = %tip.amount,
                "Pledge unfunded, dropped for this cycle"
            );
            continue;
        }
        ws.shift(&tip.tipper, &tip.tippee, tip.amount);
        ws.pending_transfers.push(PendingTransfer {
            tipper: tip.tipper.clone(),
            tippee: tip.tippee.clone(),
            amount: tip.amount,
            context: TransferContext::Tip,
        });
        tip.settled = true;
        settled += 1;
    }

    ws.tips = tips;
    settled
}

/// Settle every take against post-pledge team balances. Returns the
/// number settled this pass.
///
/// The actual take is the nominal amount capped by the growth throttle
/// (at most twice the previous cycle's actual take, floored at $1.00) and
/// by what the team has left — a team never pays out more than it holds,
/// and takes never draw on card holds.
pub fn apply_takes(ws: &mut WorkingSet) -> usize {
    let mut settled = 0;
    let mut takes = std::mem::take(&mut ws.takes);

    for take in takes.iter_mut() {
        if take.settled || take.amount.is_zero() {
            continue;
        }
        let Some(team_balance) = ws.balance_of(&take.team) else {
            continue;
        };
        let throttle = (take.last_take + take.last_take).max(TAKE_THROTTLE_FLOOR);
        let available = team_balance.max(Cents::ZERO);
        let actual = take.amount.min(throttle).min(available);
        if !actual.is_positive() {
            debug!(
                team = %take.team,
                member = %take.member,
                "Take yields nothing this cycle"
            );
            continue;
        }
        ws.shift(&take.team, &take.member, actual);
        ws.pending_transfers.push(PendingTransfer {
            tipper: take.team.clone(),
            tippee: take.member.clone(),
            amount: actual,
            context: TransferContext::Take,
        });
        take.settled = true;
        settled += 1;
    }

    ws.takes = takes;
    settled
}
