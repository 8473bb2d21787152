// Table definitions for the settlement ledger. Keep in sync with
// migrations/2026-07-12-000000_create_ledger.

diesel::table! {
    participants (id) {
        id -> Text,
        username -> Text,
        claimed_at -> Nullable<Timestamp>,
        balance_cents -> BigInt,
        giving_cents -> BigInt,
        receiving_cents -> BigInt,
        taking_cents -> BigInt,
        goal_cents -> Nullable<BigInt>,
        is_suspicious -> Nullable<Bool>,
        processor_ref -> Nullable<Text>,
        card_ref -> Nullable<Text>,
        bank_ref -> Nullable<Text>,
        last_charge_result -> Nullable<Text>,
    }
}

diesel::table! {
    tips (id) {
        id -> Integer,
        tipper -> Text,
        tippee -> Text,
        amount_cents -> BigInt,
        ctime -> Timestamp,
        mtime -> Timestamp,
    }
}

diesel::table! {
    takes (id) {
        id -> Integer,
        team -> Text,
        member -> Text,
        amount_cents -> BigInt,
        ctime -> Timestamp,
        mtime -> Timestamp,
    }
}

diesel::table! {
    transfers (id) {
        id -> Integer,
        tipper -> Text,
        tippee -> Text,
        amount_cents -> BigInt,
        context -> Text,
        timestamp -> Timestamp,
    }
}

diesel::table! {
    exchanges (id) {
        id -> Text,
        participant_id -> Text,
        amount_cents -> BigInt,
        fee_cents -> BigInt,
        status -> Text,
        route -> Nullable<Text>,
        error -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    paydays (id) {
        id -> Integer,
        ts_start -> Timestamp,
        ts_end -> Nullable<Timestamp>,
        stage -> Integer,
        n_participants -> Integer,
        n_tips -> Integer,
        n_transfers -> Integer,
        transfer_volume_cents -> BigInt,
        n_charges -> Integer,
        charge_volume_cents -> BigInt,
        charge_fees_cents -> BigInt,
        n_charge_failures -> Integer,
        n_credits -> Integer,
        credit_volume_cents -> BigInt,
        n_credit_failures -> Integer,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    participants,
    tips,
    takes,
    transfers,
    exchanges,
    paydays,
);
