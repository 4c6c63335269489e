//! Client management: the people and businesses an account bills.

pub mod client;

pub use client::{
    ArchiveClient, Client, ClientArchived, ClientCommand, ClientEvent, ClientId, ClientRegistered,
    ClientStatus, ClientUpdated, ContactInfo, RegisterClient, UpdateClient,
};
