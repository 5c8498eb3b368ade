//! Diesel table definitions for the client cache.
//!
//! Timestamps are epoch milliseconds (`BigInt`); the wire's ISO strings are
//! converted at the normalizer boundary. JSON-valued columns (recipient
//! lists, headers, onboarding state) are stored as their JSON text.

diesel::table! {
    emails (id) {
        id -> Text,
        mailbox_id -> Text,
        created_at -> BigInt,
        subject -> Text,
        snippet -> Text,
        body -> Text,
        html -> Nullable<Text>,
        sender_name -> Nullable<Text>,
        sender_address -> Text,
        recipient_addresses -> Text,
        size -> BigInt,
        is_read -> Bool,
        is_starred -> Bool,
        binned_at -> Nullable<BigInt>,
        category_id -> Nullable<Text>,
        given_id -> Nullable<Text>,
        is_sender -> Bool,
        updated_at -> BigInt,
        needs_sync -> Bool,
    }
}

diesel::table! {
    draft_emails (id) {
        id -> Text,
        mailbox_id -> Text,
        created_at -> BigInt,
        subject -> Nullable<Text>,
        body -> Nullable<Text>,
        from_address -> Nullable<Text>,
        to_addresses -> Nullable<Text>,
        headers -> Nullable<Text>,
        is_deleted -> Bool,
        updated_at -> BigInt,
        needs_sync -> Bool,
    }
}

diesel::table! {
    mailbox_categories (id) {
        id -> Text,
        mailbox_id -> Text,
        name -> Text,
        color -> Nullable<Text>,
        is_deleted -> Bool,
        updated_at -> BigInt,
        needs_sync -> Bool,
    }
}

diesel::table! {
    mailboxes (id) {
        id -> Text,
        created_at -> BigInt,
        storage_used -> BigInt,
        plan -> Text,
        updated_at -> BigInt,
    }
}

diesel::table! {
    mailbox_aliases (id) {
        id -> Text,
        mailbox_id -> Text,
        alias -> Text,
        name -> Nullable<Text>,
        is_default -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    temp_aliases (id) {
        id -> Text,
        mailbox_id -> Text,
        alias -> Text,
        name -> Nullable<Text>,
        expires_at -> BigInt,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    custom_domains (id) {
        id -> Text,
        mailbox_id -> Text,
        domain -> Text,
        is_verified -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    mailbox_for_user (mailbox_id, user_id) {
        mailbox_id -> Text,
        user_id -> Text,
        role -> Text,
        is_default -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    users (id) {
        id -> Text,
        username -> Text,
        email -> Text,
        onboarding_status -> Text,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    sync_state (user_id) {
        user_id -> Text,
        last_sync -> BigInt,
        token -> Text,
        refresh_token -> Text,
        token_expires_at -> BigInt,
        refresh_token_expires_at -> BigInt,
        is_syncing -> Bool,
        api_url -> Text,
    }
}

diesel::table! {
    local_meta (id) {
        id -> Integer,
        schema_version -> Integer,
    }
}
