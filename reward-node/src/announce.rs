//! Announcement texts posted to the community.

use reward_core::{RoundId, TxRef};
use time::Date;

/// Which announcement a settled payout gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutTemplate {
    /// Winner of the current cycle.
    Standard,
    /// A round settled after the winner registered late.
    Retrospective,
    /// A round settled late although the winner had a wallet all along.
    Delayed,
}

impl PayoutTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            PayoutTemplate::Standard => "payout",
            PayoutTemplate::Retrospective => "retrospective",
            PayoutTemplate::Delayed => "delayed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    pub token_symbol: String,
    /// Explorer link with a `{tx}` placeholder.
    pub explorer_tx_url: String,
    /// Where winners register their wallet (e.g. a bot handle).
    pub registration_contact: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            token_symbol: "gMetis".to_string(),
            explorer_tx_url: "https://andromeda-explorer.metis.io/tx/{tx}".to_string(),
            registration_contact: "the wallet registration bot".to_string(),
        }
    }
}

fn mention(display_name: &str) -> String {
    let name = display_name.trim().trim_start_matches('@');
    format!("@{name}")
}

impl Templates {
    pub fn tx_link(&self, tx: &TxRef) -> String {
        self.explorer_tx_url.replace("{tx}", tx.as_str())
    }

    pub fn registration(&self, round_id: RoundId, display_name: &str) -> String {
        format!(
            "🎯 Reward Round #{round_id}\n\n\
             🎉 Congratulations {who}! 🎉\n\
             ✨ You've been selected for a reward!\n\
             📝 Please message {contact} to register your wallet address.\n\
             💫 Your reward will be processed automatically once registered!",
            who = mention(display_name),
            contact = self.registration_contact,
        )
    }

    pub fn payout(&self, round_id: RoundId, display_name: &str, amount: u64, tx: &TxRef) -> String {
        format!(
            "🎯 Reward Round #{round_id}\n\n\
             🎉 Congratulations {who}! 🎉\n\
             ✨ Thank you for vibing with us!\n\
             🎁 You've received {amount} {symbol}!\n\
             🔗 Transaction: {link}\n\n\
             🚀 Keep shining and stay awesome! 🚀",
            who = mention(display_name),
            symbol = self.token_symbol,
            link = self.tx_link(tx),
        )
    }

    pub fn retrospective(
        &self,
        round_id: RoundId,
        display_name: &str,
        amount: u64,
        tx: &TxRef,
        original_date: Date,
    ) -> String {
        format!(
            "🎯 Reward Round #{round_id} - Retrospective Payout 🎯\n\n\
             🎉 {who} has registered their wallet address! 🎉\n\
             ✨ Processing their previously won reward...\n\
             🎁 They've received {amount} {symbol}!\n\
             📅 Original win date: {original_date}\n\
             🔗 Transaction: {link}\n\n\
             🚀 Better late than never! Keep vibing! 🚀",
            who = mention(display_name),
            symbol = self.token_symbol,
            link = self.tx_link(tx),
        )
    }

    pub fn delayed(
        &self,
        round_id: RoundId,
        display_name: &str,
        amount: u64,
        tx: &TxRef,
        original_date: Date,
    ) -> String {
        format!(
            "🎯 Reward Round #{round_id} - Delayed Payout 🎯\n\n\
             🎉 Congratulations {who}! 🎉\n\
             ✨ Your reward from an earlier round has now been processed.\n\
             🎁 You've received {amount} {symbol}!\n\
             📅 Original win date: {original_date}\n\
             🔗 Transaction: {link}\n\n\
             🚀 Thanks for your patience! Keep vibing! 🚀",
            who = mention(display_name),
            symbol = self.token_symbol,
            link = self.tx_link(tx),
        )
    }

    pub fn settled(
        &self,
        template: PayoutTemplate,
        round_id: RoundId,
        display_name: &str,
        amount: u64,
        tx: &TxRef,
        original_date: Date,
    ) -> String {
        match template {
            PayoutTemplate::Standard => self.payout(round_id, display_name, amount, tx),
            PayoutTemplate::Retrospective => {
                self.retrospective(round_id, display_name, amount, tx, original_date)
            }
            PayoutTemplate::Delayed => {
                self.delayed(round_id, display_name, amount, tx, original_date)
            }
        }
    }

    pub fn quiet_period(&self) -> String {
        "It's awfully quiet here. Anyone is vibing? 🎵".to_string()
    }

    pub fn no_eligible_winner(&self) -> String {
        "Seems like we don't have much of a crowd here huh?".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn payout_mentions_amount_and_link() {
        let t = Templates::default();
        let text = t.payout(RoundId(12), "alice", 60, &TxRef::new("0xabc"));
        assert!(text.starts_with("🎯 Reward Round #12"));
        assert!(text.contains("@alice"));
        assert!(text.contains("60 gMetis"));
        assert!(text.contains("https://andromeda-explorer.metis.io/tx/0xabc"));
    }

    #[test]
    fn retrospective_is_distinguishable() {
        let t = Templates::default();
        let tx = TxRef::new("0x1");
        let text = t.settled(
            PayoutTemplate::Retrospective,
            RoundId(3),
            "@bob",
            20,
            &tx,
            date!(2024 - 02 - 29),
        );
        assert!(text.contains("Retrospective Payout"));
        assert!(text.contains("@bob has registered"));
        assert!(!text.contains("@@bob"));
        assert!(text.contains("Original win date: 2024-02-29"));
        assert_ne!(
            text,
            t.settled(PayoutTemplate::Standard, RoundId(3), "@bob", 20, &tx, date!(2024 - 02 - 29))
        );
    }

    #[test]
    fn delayed_payout_does_not_claim_late_registration() {
        let t = Templates::default();
        let text = t.settled(
            PayoutTemplate::Delayed,
            RoundId(4),
            "dave",
            50,
            &TxRef::new("0x2"),
            date!(2024 - 03 - 01),
        );
        assert!(text.contains("Delayed Payout"));
        assert!(text.contains("50 gMetis"));
        assert!(text.contains("Original win date: 2024-03-01"));
        assert!(!text.contains("has registered"));
    }

    #[test]
    fn registration_names_contact() {
        let t = Templates {
            registration_contact: "@wallet_bot".to_string(),
            ..Templates::default()
        };
        let text = t.registration(RoundId(1), "carol");
        assert!(text.contains("@carol"));
        assert!(text.contains("message @wallet_bot"));
    }
}
