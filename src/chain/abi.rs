//! Contract interfaces read by the tracker

use alloy_sol_types::sol;

sol! {
    /// Uniswap V3 layout: slot 4 is the fee tier
    #[derive(Debug)]
    interface INonfungiblePositionManager {
        function positions(uint256 tokenId) external view returns (
            uint96 nonce, address operator, address token0, address token1,
            uint24 fee, int24 tickLower, int24 tickUpper, uint128 liquidity,
            uint256 feeGrowthInside0LastX128, uint256 feeGrowthInside1LastX128,
            uint128 tokensOwed0, uint128 tokensOwed1
        );
        function ownerOf(uint256 tokenId) external view returns (address);
    }

    /// Slipstream layout: slot 4 is the tick spacing
    #[derive(Debug)]
    interface ISlipstreamPositionManager {
        function positions(uint256 tokenId) external view returns (
            uint96 nonce, address operator, address token0, address token1,
            int24 tickSpacing, int24 tickLower, int24 tickUpper, uint128 liquidity,
            uint256 feeGrowthInside0LastX128, uint256 feeGrowthInside1LastX128,
            uint128 tokensOwed0, uint128 tokensOwed1
        );
    }

    #[derive(Debug)]
    interface IERC20 {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }

    #[derive(Debug)]
    interface IClPool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            uint8 feeProtocol, bool unlocked
        );
        function liquidity() external view returns (uint128);
    }

    /// Slipstream pools drop `feeProtocol` from slot0
    #[derive(Debug)]
    interface ISlipstreamPool {
        function slot0() external view returns (
            uint160 sqrtPriceX96, int24 tick, uint16 observationIndex,
            uint16 observationCardinality, uint16 observationCardinalityNext,
            bool unlocked
        );
    }

    #[derive(Debug)]
    interface IClFactory {
        function poolImplementation() external view returns (address);
    }

    #[derive(Debug)]
    interface IClGaugeFactory {
        function getGauge(address pool) external view returns (address);
    }

    #[derive(Debug)]
    interface IGaugeV2 {
        function earned(address token, uint256 tokenId) external view returns (uint256);
    }

    /// OpenZeppelin v5 ERC-721 custom error for burned / never-minted ids
    error ERC721NonexistentToken(uint256 tokenId);
}
