//! Definitions of Solidity functions called during deployment, wiring, and upgrades

use alloy::sol;

sol! {
    /// The `ProxyAdmin` deployed alongside a `TransparentUpgradeableProxy`
    interface IProxyAdmin {
        function upgradeAndCall(address proxy, address implementation, bytes memory data) external payable;
    }

    /// The upgrade entrypoint of a UUPS implementation, reached through its `ERC1967Proxy`
    interface IUUPSUpgradeable {
        function upgradeToAndCall(address newImplementation, bytes memory data) external payable;
    }

    /// OpenZeppelin `AccessControl`
    interface IAccessControl {
        function grantRole(bytes32 role, address account) external;
        function revokeRole(bytes32 role, address account) external;
    }
}
