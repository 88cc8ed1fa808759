pub use shared::{
    ApiError, Coordinate, Destination, DestinationRequest, LocationSample, NavigationPhase,
    NavigationSnapshot, RainAvoidanceAlert, RemainingRoute, RideSummary, RouteBounds, RouteMode,
    RouteSummary, Spot, SpotSearchRequest, TransportType, WarningLevel, WeatherSnapshot,
};
