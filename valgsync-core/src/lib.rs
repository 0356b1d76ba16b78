mod client;

pub use client::{
    RemoteEntry, RemoteStore, SftpClient, SftpConfig, StoreError, StoreFactory, remote_join,
};
