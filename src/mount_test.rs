#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use core::ptr;
    use core::sync::atomic::Ordering;

    use crate::dentry::WRAPFS_DOPS;
    use crate::config::WrapfsConfig;
    use crate::error::WrapfsError;
    use crate::fstype::{exit_wrapfs, init_wrapfs, MountRequest, WrapfsEnv, WrapfsFsType, WRAPFS_NAME};
    use crate::super_block::{WRAPFS_SOPS, WRAPFS_TIME_GRAN};
    use crate::test_support::{FailingInterposer, Fixture, LOWER_MAXBYTES, NEVER};
    use crate::vfs::{FileSystemType, FsFlags, LookupFlags, MountFlags, PathResolver};

    #[test]
    fn test_missing_dev_name_touches_nothing() {
        let fx = Fixture::new();
        let before = fx.snapshot();
        fx.pool.arm(NEVER);

        for request in [MountRequest::without_dev(), MountRequest::new("")] {
            let err = fx.fs.mount(&fx.table, "/mnt", &request).unwrap_err();
            assert!(matches!(err, WrapfsError::InvalidArgument(_)));
            assert_eq!(err.errno(), -22);
        }
        assert_eq!(fx.pool.seen(), 0);
        assert_eq!(fx.snapshot(), before);
        assert!(fx.table.targets().is_empty());
    }

    #[test]
    fn test_mount_builds_root_over_lower_dir() {
        let fx = Fixture::new();
        let before = fx.snapshot();

        let sb = fx
            .fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/lower"))
            .unwrap();
        assert_eq!(fx.lower_sb.active(), before.active + 1);
        assert!(Arc::ptr_eq(sb.lower_sb().unwrap(), &fx.lower_sb));
        assert_eq!(sb.s_maxbytes(), LOWER_MAXBYTES);
        assert_eq!(sb.s_time_gran(), WRAPFS_TIME_GRAN);
        assert!(ptr::eq(sb.s_op(), &WRAPFS_SOPS));
        assert!(sb.s_dev() >= 0x100);

        let root = sb.root();
        assert!(root.is_root());
        assert!(Arc::ptr_eq(&root.parent().unwrap(), root));
        assert_eq!(root.name(), "/");
        assert_eq!(root.sb_dev(), sb.s_dev());
        assert!(ptr::eq(root.ops(), &WRAPFS_DOPS));
        assert!(root.revalidate());

        let lower = fx.ns.resolve("/lower", LookupFlags::empty()).unwrap();
        let inode = root.inode().unwrap();
        assert_eq!(inode.ino(), lower.dentry().inode().unwrap().ino());
        assert_eq!(inode.sb_dev(), sb.s_dev());
        drop(lower);

        assert_eq!(fx.ns.ref_count("/lower").unwrap(), before.lower_refs + 1);
        assert_eq!(fx.fs.caches().inode.live(), 1);
        assert_eq!(fx.fs.caches().dentry.live(), 1);
        assert_eq!(sb.tiers().map(|t| t.len()), Some(0));
        assert_eq!(sb.show_options(), "lowerdir=/lower");
        assert!(Arc::ptr_eq(&fx.table.get("/mnt").unwrap(), &sb));
    }

    #[test]
    fn test_symlinked_lower_dir_is_followed() {
        let fx = Fixture::new();
        let sb = fx
            .fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/lower/to_a"))
            .unwrap();
        let lower = sb.root().lower_path().unwrap();
        assert_eq!(lower.dentry().name(), "a");
        assert_eq!(fx.ns.ref_count("/lower/a").unwrap(), 1);
    }

    #[test]
    fn test_bad_lower_dir_allocates_nothing() {
        let fx = Fixture::new();
        let before = fx.snapshot();
        fx.pool.arm(NEVER);

        let cases = [
            ("/lower/file", -20),
            ("/lower/missing", -2),
            ("lower", -22),
        ];
        for (dev, errno) in cases {
            let err = fx
                .fs
                .mount(&fx.table, "/mnt", &MountRequest::new(dev))
                .unwrap_err();
            assert_eq!(err.errno(), errno, "{}", dev);
        }
        assert_eq!(fx.pool.seen(), 0);
        assert_eq!(fx.snapshot(), before);
    }

    #[test]
    fn test_every_allocation_failure_unwinds() {
        let fx = Fixture::new();
        let before = fx.snapshot();

        // extension block, root name, root linkage, root inode
        for n in 1..=4 {
            fx.pool.arm(n);
            let err = fx
                .fs
                .mount(&fx.table, "/mnt", &MountRequest::new("/lower"))
                .unwrap_err();
            if n == 4 {
                assert!(matches!(err, WrapfsError::InterposeFailure(_)), "{:?}", err);
            } else {
                assert_eq!(err, WrapfsError::OutOfMemory, "allocation {}", n);
            }
            assert_eq!(fx.snapshot(), before, "allocation {}", n);
            assert!(fx.table.get("/mnt").is_none());
        }

        fx.pool.arm(NEVER);
        fx.fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/lower"))
            .unwrap();
        assert_eq!(fx.pool.seen(), 4);
    }

    #[test]
    fn test_lower_lookup_failure_unwinds() {
        let fx = Fixture::new();
        let before = fx.snapshot();
        fx.resolver.arm(1);
        let err = fx
            .fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/lower"))
            .unwrap_err();
        assert!(matches!(err, WrapfsError::NotFound(_)));
        assert_eq!(fx.snapshot(), before);
    }

    #[test]
    fn test_interpose_failure_releases_active_ref_once() {
        let fx = Fixture::new();
        let failing = Arc::new(FailingInterposer::default());
        let env = WrapfsEnv::new(fx.resolver.clone()).with_pool(fx.pool.clone());
        let fs = WrapfsFsType::new(env).unwrap().with_interposer(failing.clone());
        let before = fx.snapshot();

        let err = fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/lower"))
            .unwrap_err();
        assert!(matches!(err, WrapfsError::InterposeFailure(_)));
        assert_eq!(err.errno(), -5);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.lower_sb.active(), before.active);
        assert_eq!(fx.snapshot(), before);
        assert_eq!(fs.caches().dentry.live(), 0);
    }

    #[test]
    fn test_busy_target_rejected() {
        let fx = Fixture::new();
        let before = fx.snapshot();
        let _sb = fx
            .fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/lower"))
            .unwrap();
        let err = fx
            .fs
            .mount(&fx.table, "/mnt/", &MountRequest::new("/lower/a"))
            .unwrap_err();
        assert_eq!(err, WrapfsError::Busy("/mnt".into()));
        assert_eq!(fx.lower_sb.active(), before.active + 1);
        assert_eq!(fx.ns.ref_count("/lower/a").unwrap(), 0);
    }

    #[test]
    fn test_instances_share_lower_filesystem() {
        let fx = Fixture::new();
        let before = fx.snapshot();
        let first = fx
            .fs
            .mount(&fx.table, "/mnt/one", &MountRequest::new("/lower/a"))
            .unwrap();
        let second = fx
            .fs
            .mount(&fx.table, "/mnt/two", &MountRequest::new("/lower/b"))
            .unwrap();
        assert_ne!(first.s_dev(), second.s_dev());
        assert_eq!(fx.lower_sb.active(), before.active + 2);
        assert_eq!(fx.table.targets(), ["/mnt/one", "/mnt/two"]);
    }

    #[test]
    fn test_umount_restores_counters() {
        let fx = Fixture::new();
        let before = fx.snapshot();
        let sb = fx
            .fs
            .mount(
                &fx.table,
                "/mnt",
                &MountRequest::new("/lower").with_flags(MountFlags::SILENT),
            )
            .unwrap();
        assert!(sb.s_flags().contains(MountFlags::SILENT));

        fx.fs.umount(&fx.table, "/mnt").unwrap();
        assert_eq!(fx.lower_sb.active(), before.active + 1);
        drop(sb);
        assert_eq!(fx.snapshot(), before);

        assert_eq!(
            fx.fs.umount(&fx.table, "/mnt").unwrap_err(),
            WrapfsError::NotMounted("/mnt".into())
        );
    }

    #[test]
    fn test_registration_lifecycle() {
        let fx = Fixture::new();
        let registered = fx.registry.get(WRAPFS_NAME).unwrap();
        assert_eq!(registered.fs_flags(), FsFlags::REVAL_DOT);

        let env = WrapfsEnv::new(fx.resolver.clone()).with_pool(fx.pool.clone());
        let err = init_wrapfs(&fx.registry, env).unwrap_err();
        assert_eq!(err, WrapfsError::AlreadyRegistered(WRAPFS_NAME.into()));

        exit_wrapfs(&fx.registry, &fx.fs).unwrap();
        assert!(fx.registry.get(WRAPFS_NAME).is_none());
        assert_eq!(
            fx.fs.caches().inode.alloc(0u8).unwrap_err(),
            WrapfsError::OutOfMemory
        );
        assert!(matches!(
            exit_wrapfs(&fx.registry, &fx.fs),
            Err(WrapfsError::NotRegistered(_))
        ));
    }

    fn link_chain(fx: &Fixture) {
        fx.ns.symlink("/l1", "/lower/a").unwrap();
        fx.ns.symlink("/l2", "/l1").unwrap();
        fx.ns.symlink("/l3", "/l2").unwrap();
    }

    #[test]
    fn test_configured_symlink_limit_stops_mount() {
        let config = WrapfsConfig::from_json(r#"{ "max_symlinks": 1 }"#).unwrap();
        let fx = Fixture::with_config(config);
        link_chain(&fx);
        let before = fx.snapshot();

        let err = fx
            .fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/l3"))
            .unwrap_err();
        assert!(matches!(err, WrapfsError::TooManySymlinks(_)), "{:?}", err);
        assert_eq!(err.errno(), -40);
        assert_eq!(fx.snapshot(), before);

        let sb = fx
            .fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/l1"))
            .unwrap();
        assert_eq!(sb.root().lower_path().unwrap().dentry().name(), "a");
    }

    #[test]
    fn test_default_symlink_limit_allows_chain() {
        let fx = Fixture::new();
        link_chain(&fx);
        let sb = fx
            .fs
            .mount(&fx.table, "/mnt", &MountRequest::new("/l3"))
            .unwrap();
        assert_eq!(sb.root().lower_path().unwrap().dentry().name(), "a");
    }
}
